//! Storage module - key-value stores, the chain store and the UTXO index

mod chain;
mod db;
mod error;
pub(crate) mod kv;
mod utxo;

pub use chain::*;
pub use db::*;
pub use error::*;
pub use kv::*;
pub use utxo::*;
