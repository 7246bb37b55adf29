//! Async deadline helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Run `fut` with an optional deadline; `None` waits forever.
///
/// # Errors
/// Returns `BridgeError::Timeout` when the deadline passes first.
pub async fn with_deadline<F, T>(deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(duration) => tokio::time::timeout(duration, fut)
            .await
            .map_err(|_| BridgeError::Timeout)?,
        None => fut.await,
    }
}
