#![allow(clippy::module_name_repetitions)]

use anyhow::{Context, Result};
use tokio::sync::watch;

pub mod constants;
pub mod encryption;
pub mod field;
pub mod hashing;
pub mod retry;

pub use field::FieldElement;
pub use retry::{Backoff, RetryError, RetryPolicy};

/// Spawns a task that triggers shutdown if it returns an error
///
/// # Arguments
///
/// * `f` - The future to execute, which must return a `Result<()>`
/// * `shutdown_sender` - Sender flipped to `true` when `f` fails, so sibling tasks can stop
///
/// # Returns
///
/// Returns a `JoinHandle` for the spawned task
pub fn spawn_with_shutdown<F>(
    f: F,
    shutdown_sender: watch::Sender<bool>,
) -> tokio::task::JoinHandle<Result<()>>
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::task::spawn(async move {
        let res = f.await;
        if res.is_err() {
            shutdown_sender
                .send(true)
                .context("Failed to send shutdown signal")?;
        }
        res
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_task_signals_shutdown() {
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let handle = spawn_with_shutdown(async { anyhow::bail!("boom") }, shutdown_sender);

        assert!(handle.await.unwrap().is_err());
        assert!(*shutdown_receiver.borrow());
    }

    #[tokio::test]
    async fn test_successful_task_leaves_shutdown_untouched() {
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let handle = spawn_with_shutdown(async { Ok(()) }, shutdown_sender);

        assert!(handle.await.unwrap().is_ok());
        assert!(!*shutdown_receiver.borrow());
    }
}
