//! celldb: an embedded engine for sparse, timestamped row/column datasets.
//!
//! This facade re-exports [`celldb_core`]; see that crate for the engine
//! internals.

pub use celldb_core::*;
