//! Write-with-retry policy for profile persistence.
//!
//! A quota failure trims the oldest content and retries once. A second
//! failure, or any non-recoverable error, is logged and the write dropped;
//! persistence errors never reach the visitor.

use crate::truncate::tail_at_line_boundary;
use concierge_core::error::PersistenceError;
use std::future::Future;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Written(String),
    /// Written after trimming; holds the text actually stored
    Trimmed(String),
    Dropped,
}

impl PersistOutcome {
    /// The text that reached the store, if any.
    pub fn stored(&self) -> Option<&str> {
        match self {
            Self::Written(text) | Self::Trimmed(text) => Some(text),
            Self::Dropped => None,
        }
    }
}

/// Run `write` with `text`, trimming and retrying once on a quota error.
pub async fn write_with_retry<F, Fut>(what: &str, text: String, mut write: F) -> PersistOutcome
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<(), PersistenceError>>,
{
    let err = match write(text.clone()).await {
        Ok(()) => return PersistOutcome::Written(text),
        Err(e) => e,
    };

    if !err.is_recoverable() {
        warn!(what, error = %err, "Persistence failed, dropping write");
        return PersistOutcome::Dropped;
    }

    let trimmed = trim_for_retry(&text, &err);
    warn!(
        what,
        error = %err,
        from = text.len(),
        to = trimmed.len(),
        "Persistence quota exceeded, retrying with trimmed text"
    );

    match write(trimmed.clone()).await {
        Ok(()) => PersistOutcome::Trimmed(trimmed),
        Err(e) => {
            warn!(what, error = %e, "Persistence retry failed, dropping write");
            PersistOutcome::Dropped
        }
    }
}

/// Keep the newest content: what the quota says fits, or half otherwise.
fn trim_for_retry(text: &str, err: &PersistenceError) -> String {
    let chars = text.chars().count();
    let target = match err {
        PersistenceError::QuotaExceeded { needed, available } if *needed > 0 => {
            chars * *available / *needed
        }
        _ => chars / 2,
    };
    tail_at_line_boundary(text, target.min(chars / 2).max(1)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn quota(available: usize) -> impl FnMut(String) -> std::future::Ready<Result<(), PersistenceError>> {
        move |text: String| {
            std::future::ready(if text.len() > available {
                Err(PersistenceError::QuotaExceeded {
                    needed: text.len(),
                    available,
                })
            } else {
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn first_write_succeeds() {
        let outcome = write_with_retry("profile", "hello".into(), quota(100)).await;
        assert_eq!(outcome, PersistOutcome::Written("hello".into()));
    }

    #[tokio::test]
    async fn quota_error_trims_oldest_and_retries() {
        let text = "old line one\nold line two\nnewest line".to_string();
        let outcome = write_with_retry("profile", text, quota(20)).await;
        let stored = outcome.stored().unwrap();
        assert!(matches!(outcome, PersistOutcome::Trimmed(_)));
        assert!(stored.len() <= 20);
        assert!(stored.ends_with("newest line"));
    }

    #[tokio::test]
    async fn second_failure_drops() {
        let calls = Mutex::new(0);
        let outcome = write_with_retry("inner_voice", "x".repeat(50), |_text| {
            *calls.lock().unwrap() += 1;
            std::future::ready(Err(PersistenceError::QuotaExceeded {
                needed: 50,
                available: 0,
            }))
        })
        .await;
        assert_eq!(outcome, PersistOutcome::Dropped);
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn storage_errors_are_not_retried() {
        let calls = Mutex::new(0);
        let outcome = write_with_retry("profile", "text".into(), |_text| {
            *calls.lock().unwrap() += 1;
            std::future::ready(Err(PersistenceError::Storage("disk full".into())))
        })
        .await;
        assert_eq!(outcome, PersistOutcome::Dropped);
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
