//! Admission control: token buckets and the per-client limiter registry.

mod bucket;
mod registry;

pub use bucket::{Admission, TokenBucket};
pub use registry::{BucketParams, LimiterRegistry};
