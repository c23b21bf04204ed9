//! HTTP request handlers.

pub mod common;
pub mod content;
pub mod health;
pub mod uploads;

pub use common::*;
pub use content::*;
pub use health::*;
pub use uploads::*;
