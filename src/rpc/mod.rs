//! JSON-RPC API module
//!
//! HTTP interface through which peers and tools query the chain and hand
//! over blocks.

mod methods;
mod server;

pub use methods::*;
pub use server::*;
