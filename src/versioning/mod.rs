//! Application-time revision state machine

pub mod application;
