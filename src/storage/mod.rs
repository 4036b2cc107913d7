pub mod block;
pub mod file_manager;
pub mod page;

pub use block::BlockId;
pub use file_manager::{FileManager, FileStats};
pub use page::Page;
