//! Repository implementations for database operations

pub mod runs;

pub use runs::*;
