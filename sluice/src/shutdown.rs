//! Turn OS termination signals into a cancellation token.
//!
//! Applications share one [`CancellationToken`] between their pipeline loops
//! and [`wait_for_signal`]; whichever fires first wins and everyone else
//! observes the cancellation.

use tokio_util::sync::CancellationToken;

/// Wait for SIGINT, SIGTERM or SIGQUIT, or for `token` to be cancelled
/// elsewhere, then cancel `token`.
///
/// On non-unix targets only ctrl-c is watched.
pub async fn wait_for_signal(token: CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => {
            tracing::debug!("shutdown requested");
        }
        name = termination_signal() => {
            tracing::info!(signal = name, "received termination signal, shutting down");
        }
    }
    token.cancel();
}

#[cfg(unix)]
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    fn install(kind: SignalKind, name: &'static str) -> Option<Signal> {
        match signal(kind) {
            Ok(stream) => Some(stream),
            Err(err) => {
                tracing::warn!(signal = name, error = %err, "failed to install signal handler");
                None
            }
        }
    }

    async fn received(stream: &mut Option<Signal>) {
        if let Some(stream) = stream {
            if stream.recv().await.is_some() {
                return;
            }
        }
        std::future::pending().await
    }

    let mut interrupt = install(SignalKind::interrupt(), "SIGINT");
    let mut terminate = install(SignalKind::terminate(), "SIGTERM");
    let mut quit = install(SignalKind::quit(), "SIGQUIT");

    tokio::select! {
        _ = received(&mut interrupt) => "SIGINT",
        _ = received(&mut terminate) => "SIGTERM",
        _ = received(&mut quit) => "SIGQUIT",
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(err) => {
            tracing::warn!(error = %err, "failed to install ctrl-c handler");
            std::future::pending().await
        }
    }
}
