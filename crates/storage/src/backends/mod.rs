//! Storage backend implementations.

pub mod filesystem;
mod staging;
