//! Signal handling for graceful shutdown.

use tracing::{error, info};

/// Wait for SIGINT, SIGTERM or SIGQUIT.
///
/// If the handlers cannot be installed this falls back to Ctrl-C, and waits
/// forever when even that is unavailable.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    );
    let (mut sigint, mut sigterm, mut sigquit) = match handlers {
        (Ok(sigint), Ok(sigterm), Ok(sigquit)) => (sigint, sigterm, sigquit),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            error!(error = %e, "Failed to install signal handlers, falling back to Ctrl-C");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => {
            info!(message = "Signal received.", signal = "SIGINT");
        }
        _ = sigterm.recv() => {
            info!(message = "Signal received.", signal = "SIGTERM");
        }
        _ = sigquit.recv() => {
            info!(message = "Signal received.", signal = "SIGQUIT");
        }
    }
}

/// Wait for Ctrl-C.
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    ctrl_c().await
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(message = "Signal received.", signal = "Ctrl-C"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_job_tokens_share_cancellation() {
        let shutdown = CancellationToken::new();
        let for_ingest = shutdown.clone();
        let for_distribute = shutdown.clone();

        shutdown.cancel();

        assert!(for_ingest.is_cancelled());
        assert!(for_distribute.is_cancelled());
    }

    #[tokio::test]
    async fn test_stream_token_does_not_cancel_parent() {
        let shutdown = CancellationToken::new();
        let streams = shutdown.child_token();
        let stream = streams.child_token();

        stream.cancel();
        assert!(!streams.is_cancelled());
        assert!(!shutdown.is_cancelled());

        let other = streams.child_token();
        shutdown.cancel();
        assert!(other.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancellation_wakes_sleeper() {
        let shutdown = CancellationToken::new();
        let sleeper = shutdown.clone();

        let handle = tokio::spawn(async move {
            sleeper
                .run_until_cancelled(tokio::time::sleep(Duration::from_secs(10)))
                .await
        });

        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("task should complete quickly")
            .expect("task should not panic");
        assert!(result.is_none());
    }
}
