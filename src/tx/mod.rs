pub mod buffer_list;
pub mod gate;
pub mod id;
pub mod recovery;
pub mod transaction;

pub use recovery::{RecoveryManager, RecoveryReport};
pub use transaction::{Transaction, TxContext, TxState};
