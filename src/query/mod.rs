//! As-of querying: predicates, scopes, relations and association traversal

pub mod association;
pub mod predicate;
pub mod relation;
pub mod scope;

pub use association::traverse;
pub use predicate::Predicate;
pub use relation::Relation;
pub use scope::{ScopeGuard, TimeScope};
