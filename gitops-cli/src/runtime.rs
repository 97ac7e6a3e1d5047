//! Tracing setup and the tokio runtime shared by all subcommands.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

/// Log to stderr so stdout stays machine-readable.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run `task` on a fresh multi-threaded runtime.
///
/// The token handed to `task` is cancelled on Ctrl-C and, when `timeout` is
/// set, once it elapses.
pub fn block_on<F, Fut, T>(timeout: Option<Duration>, task: F) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        spawn_cancel_triggers(&cancel, timeout);
        task(cancel).await
    })
}

fn spawn_cancel_triggers(cancel: &CancellationToken, timeout: Option<Duration>) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    if let Some(limit) = timeout {
        let on_deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = on_deadline.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    tracing::warn!("Timeout of {}s reached, cancelling", limit.as_secs());
                    on_deadline.cancel();
                }
            }
        });
    }
}
