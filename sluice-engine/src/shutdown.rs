//! Shutdown signalling
//!
//! Every process owns one [`CancellationToken`]. It is cancelled on
//! SIGINT/SIGTERM and, for worker children, when the supervisor closes the
//! child's stdin.

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancels `token` on SIGINT or SIGTERM
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        token.cancel();
    });
}

/// Cancels `token` once stdin reaches end-of-file
///
/// The supervisor holds the write end of each child's stdin pipe, so EOF
/// means either a cooperative stop request or a dead supervisor.
pub fn cancel_on_stdin_eof(token: CancellationToken) {
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 64];

        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => {
                    info!("Stdin closed, stopping");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("Failed to read stdin, stopping: {}", e);
                    break;
                }
            }
        }

        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
