//! roux-core — shared types, the error taxonomy, and pure algorithms for the
//! Roux knowledge-graph engine: no filesystem, database, or network I/O
//! lives here (see `roux-store` for the engine that composes these with
//! I/O).

pub mod error;
pub mod fuzzy;
pub mod heap;
pub mod link;
pub mod math;
pub mod types;

pub use error::{ErrorKind, RouxError, RouxResult};
pub use types::*;
