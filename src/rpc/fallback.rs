//! Versioned-then-legacy endpoint fallback

use std::future::Future;
use tracing::{info, warn};

use super::ProtocolError;

/// Run `primary`; if it fails, run `secondary` once.
///
/// `primary` must already have mapped "unsuccessful" or empty payloads to an
/// error. At most two attempts are made and the legacy attempt is only built
/// when it is needed.
pub(crate) async fn with_fallback<T, P, S, SF>(
    operation: &'static str,
    primary: P,
    secondary: S,
) -> Result<T, ProtocolError>
where
    P: Future<Output = Result<T, ProtocolError>>,
    S: FnOnce() -> SF,
    SF: Future<Output = Result<T, ProtocolError>>,
{
    let primary_error = match primary.await {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    warn!(operation, error = %primary_error, "versioned endpoint failed, trying legacy endpoint");

    match secondary().await {
        Ok(value) => {
            info!(operation, "legacy endpoint succeeded");
            Ok(value)
        }
        Err(secondary_error) => {
            warn!(operation, error = %secondary_error, "legacy endpoint failed");
            Err(ProtocolError::Exhausted {
                operation,
                primary: primary_error.to_string(),
                secondary: secondary_error.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_primary_success_skips_secondary() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result = with_fallback("op", async { Ok(1) }, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(2)
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_primary_failure_uses_secondary() {
        let result = with_fallback(
            "op",
            async { Err(ProtocolError::Rejected("nope".into())) },
            || async { Ok(2) },
        )
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_both_failing_reports_both() {
        let result: Result<u32, _> = with_fallback(
            "fetch_terms",
            async { Err(ProtocolError::Rejected("first".into())) },
            || async { Err(ProtocolError::Transport("second".into())) },
        )
        .await;

        let message = result.unwrap_err().to_string();
        assert!(message.contains("fetch_terms"));
        assert!(message.contains("first"));
        assert!(message.contains("second"));
    }
}
