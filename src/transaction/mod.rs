//! Transaction module - UTXO transactions, signing and transfer construction

mod transaction;
mod transfer;

pub use transaction::*;
pub use transfer::*;
