//! Per-video mutual exclusion and failure counting on top of the
//! coordination store.

mod lock;
mod retry;

pub use lock::LockManager;
pub use retry::RetryCounter;
