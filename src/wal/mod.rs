pub mod audit;
pub mod iterator;
pub mod log_manager;
pub mod record;

pub use iterator::LogIterator;
pub use log_manager::LogManager;
pub use record::{LogRecord, Lsn, TxId};
