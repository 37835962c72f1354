//! Cache Module
//!
//! Awaitable cache client over a callback-style driver.

mod client;
mod completion;


// Re-export public types
pub use client::{CacheClient, OperationLabels, RequestContext};
pub use completion::{deliver, Pending};
