//! Merge rules for configuration layers.

pub mod merge_policy;

pub use merge_policy::builder_with_defaults;
