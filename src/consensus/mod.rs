//! Consensus module - Block structure and proof-of-work

mod block;
mod pow;

pub use block::*;
pub use pow::*;
