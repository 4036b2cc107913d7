pub mod frame;
pub mod manager;

pub use manager::{BufferId, BufferManager};
