//! Per-format decoders.
//!
//! Each decoder exposes a `read_*(path)` entry point plus a `from_*_slice`
//! variant that works on bytes, for tests, benches and fuzzing.

pub mod idx;
pub mod pickle;
pub mod rdata;
pub mod table;
