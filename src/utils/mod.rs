pub mod file;
pub mod retry;

pub use file::{display_name, read_document};
pub use retry::{RetryConfig, RetryResult, Retryable, with_retry};
