//! OS signal handling.

/// Completes on SIGINT, SIGTERM or SIGQUIT.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => tracing::warn!(signal = "SIGINT", "shutdown requested"),
        _ = sigterm.recv() => tracing::warn!(signal = "SIGTERM", "shutdown requested"),
        _ = sigquit.recv() => tracing::warn!(signal = "SIGQUIT", "shutdown requested"),
    }
    Ok(())
}

/// Completes on Ctrl-C.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::warn!(signal = "ctrl-c", "shutdown requested");
    Ok(())
}
