//! Shared utilities.

pub mod bucket;
pub mod signal;

pub use bucket::{Bucket, BucketError, SortedItems};
pub use signal::Signal;
