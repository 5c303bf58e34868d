//! Shared error types and seed handling for the shade workspace.

pub mod errors;
pub mod seed;

pub use seed::Seed;
