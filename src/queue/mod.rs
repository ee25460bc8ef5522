//! Deduplicating, rate-limited work queue of resource identities
//!
//! The queue only ever holds identities. Workers re-read the object from the
//! cache when they dequeue a key, so a reconcile always sees the newest spec.

mod backoff;
mod work_queue;

pub use backoff::ExponentialBackoff;
pub use work_queue::{ObjectKey, WorkQueue};
