//! Repository traits for metadata operations.

pub mod contents;
pub mod tombstones;
pub mod uploads;

pub use contents::ContentRepo;
pub use tombstones::TombstoneRepo;
pub use uploads::UploadRepo;
