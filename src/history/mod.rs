//! History counterparts of live entities

pub mod namespace;
pub mod resolver;

pub use namespace::Namespace;
pub use resolver::HistoryResolver;
