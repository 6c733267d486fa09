use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is received.
/// The scheduler watches this token and terminates every running solver before
/// returning a cancelled summary.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::warn!("Received SIGTERM, terminating running jobs");
            }
            _ = sigint.recv() => {
                tracing::warn!("Received SIGINT, terminating running jobs");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}
