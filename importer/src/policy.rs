use std::time::Duration;

use crate::error::{ErrorKind, ImportError};

/// How the batch import cycle reacts to a classified error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryDirective {
    /// The range is retried by a later tick after an exponential backoff.
    Timed,
    /// Only the offending row is dropped, the batch carries on. Range level failures with
    /// this directive back off like [`RetryDirective::Timed`].
    SkipRow,
    /// Retrying cannot help, the chain stops until an operator fixed the error.
    NoRetry,
}

/// Policy describing how an [`ImportError`] is handled.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    retry_directive: RetryDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(retry_directive: RetryDirective, solution: Option<&'static str>) -> Self {
        Self {
            retry_directive,
            solution,
        }
    }

    pub fn retry_directive(&self) -> RetryDirective {
        self.retry_directive
    }

    /// Returns an operator-facing hint, when one exists.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }
}

/// Classifies an [`ImportError`] into an [`ErrorHandlingPolicy`].
pub fn build_error_handling_policy(error: &ImportError) -> ErrorHandlingPolicy {
    match error.kind() {
        ErrorKind::SourceConnectionFailed
        | ErrorKind::SourceQueryFailed
        | ErrorKind::CommitFailed
        | ErrorKind::CheckpointStoreFailed
        | ErrorKind::IoError => ErrorHandlingPolicy::new(RetryDirective::Timed, None),

        ErrorKind::MissingColumn => ErrorHandlingPolicy::new(
            RetryDirective::SkipRow,
            Some("Make sure the source table exposes every column the transformation reads."),
        ),
        ErrorKind::InvalidData | ErrorKind::DeserializationError => ErrorHandlingPolicy::new(
            RetryDirective::SkipRow,
            Some(
                "Fix the row in the source table and remove its identifier from the `dropped` \
                 checkpoint to import it.",
            ),
        ),

        ErrorKind::ConfigError => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Fix the importer configuration and restart the service."),
        ),

        _ => ErrorHandlingPolicy::new(RetryDirective::NoRetry, None),
    }
}

/// Delay before retrying a range that failed `retries_performed_so_far` times in a row.
///
/// Grows as `base * 2^retries_performed_so_far` and saturates instead of overflowing.
pub fn backoff_delay(base: Duration, retries_performed_so_far: u32) -> Duration {
    let factor = 2u32.checked_pow(retries_performed_so_far).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(Duration::MAX)
}
