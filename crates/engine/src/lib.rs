//! The TaskCourier dispatch and retry engine.

pub mod dispatch;
pub mod preferences;
pub mod retry;

pub use dispatch::DispatchEngine;
pub use preferences::PreferenceResolver;
pub use retry::{RetryPolicy, RetryScheduler};
