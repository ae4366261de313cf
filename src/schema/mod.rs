//! Schema transform: table definitions, versioning hooks and migrations

pub mod hooks;
pub mod migration;
pub mod sql;
pub mod table;

pub use hooks::*;
pub use migration::*;
pub use table::*;
