//! Core data types and models

pub mod entity;
pub mod exclusion;
pub mod record;
pub mod temporal;
pub mod value;
pub mod view;

pub use entity::*;
pub use exclusion::*;
pub use record::*;
pub use temporal::*;
pub use value::*;
pub use view::*;
