//! Filesystem access: source resolution and modification times.

pub mod metadata;
pub mod walker;

pub use metadata::ModTime;
pub use walker::{resolve_specs, Inclusion, Resolution, SkipReason, SkippedEntry, WalkOptions};
