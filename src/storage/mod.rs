//! Storage seam and the in-memory reference backend

pub mod clock;
pub mod database;
pub mod memory;
mod triggers;

pub use clock::*;
pub use database::*;
pub use memory::{MemoryDatabase, MemoryTransaction};
