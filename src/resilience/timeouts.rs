//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap client and backend I/O with a deadline
//! - Enforce connect, read, and write timeouts
//! - Cancel operations cleanly on timeout (the wrapped future is dropped)
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - A missing deadline means the operation may wait indefinitely

use std::future::Future;
use std::time::Duration;

use crate::relay::error::{RelayError, RelayResult};

/// Run `fut` with an optional deadline.
///
/// `op` names the operation in the resulting [`RelayError::Timeout`].
pub async fn with_deadline<F, T>(op: &'static str, deadline: Option<Duration>, fut: F) -> RelayResult<T>
where
    F: Future<Output = RelayResult<T>>,
{
    match deadline {
        Some(duration) => match tokio::time::timeout(duration, fut).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout { op }),
        },
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_is_timeout() {
        let result: RelayResult<()> = with_deadline(
            "client read",
            Some(Duration::from_secs(1)),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        assert!(matches!(result, Err(RelayError::Timeout { op: "client read" })));
    }

    #[tokio::test]
    async fn inner_result_passes_through() {
        let ok = with_deadline("write", Some(Duration::from_secs(1)), async { Ok(3) }).await;
        assert_eq!(ok.unwrap(), 3);

        let err: RelayResult<()> = with_deadline("write", None, async { Err(RelayError::ClientClosed) }).await;
        assert!(matches!(err, Err(RelayError::ClientClosed)));
    }
}
