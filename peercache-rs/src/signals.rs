//! Terminates the platform once the node is asked to shut down.
//!
//! Forks a task which waits for **CTRL+C**, **SIGTERM** (as sent by docker) or **SIGHUP** and
//! then invokes [Platform::terminate](crate::platform::Platform::terminate).
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};

use crate::platform::Platform;

/// Installs the signal handler for the given platform.
///
/// Note that this is automatically called by the [Builder](crate::builder::Builder) unless it is
/// disabled.
pub fn install(platform: Arc<Platform>) {
    crate::spawn!(async move {
        let (mut sig_term, mut sig_hup) =
            match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
                (Ok(sig_term), Ok(sig_hup)) => (sig_term, sig_hup),
                (Err(error), _) | (_, Err(error)) => {
                    log::error!("Failed to install signal handlers: {}", error);
                    return;
                }
            };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => log::info!("Received CTRL-C. Shutting down..."),
            _ = sig_term.recv() => log::info!("Received SIGTERM. Shutting down..."),
            _ = sig_hup.recv() => log::info!("Received SIGHUP. Shutting down..."),
        }

        platform.terminate();
    });
}
