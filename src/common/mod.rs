//! Common types, traits, and utilities shared across components

pub mod alerts;
pub mod backoff;
pub mod channels;
pub mod errors;
pub mod traits;
pub mod types;
