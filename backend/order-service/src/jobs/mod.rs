pub mod payment_retry;

pub use payment_retry::{
    decide, retry_backoff, ManualRetryOutcome, PaymentRetryScheduler, RetryDecision,
};
