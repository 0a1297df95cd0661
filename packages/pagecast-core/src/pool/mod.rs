//! Bounded resource pooling.
//!
//! [`Pool`] is the generic min/max pool used at both tiers: the outer
//! pool holds browsers, each browser holds an inner pool of pages.
//! [`PagePool`](page_pool::PagePool) layers the two-tier acquisition
//! algorithm on top.

mod generic;
mod page_pool;

pub use generic::{Pool, PoolResource};
pub use page_pool::{PageLease, PagePool};

use thiserror::Error;

/// Errors from pool acquisition and warmup.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No capacity and the caller opted out of waiting.
    #[error("pool exhausted")]
    Exhausted,

    /// The pool has been shut down.
    #[error("pool closed")]
    Closed,

    /// The resource factory failed.
    #[error("resource creation failed: {0}")]
    Create(String),
}

/// Convenient Result alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
