//! Terminates the platform once the process is asked to stop.
//!
//! Benchmark harnesses usually stop the target with **SIGTERM** between runs, while an operator
//! hits **CTRL+C**. Both (and **SIGHUP**) invoke
//! [Platform::terminate](crate::platform::Platform::terminate) so that the server loop exits and
//! all pooled connections are released.
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};

use crate::platform::Platform;

/// Forks a task which awaits one of the termination signals and then terminates the platform.
///
/// Note that this is automatically called by the [Builder](crate::builder::Builder) unless it is
/// disabled.
pub fn install(platform: Arc<Platform>) {
    crate::spawn!(async move {
        let (mut sig_hup, mut sig_term) =
            match (signal(SignalKind::hangup()), signal(SignalKind::terminate())) {
                (Ok(hup), Ok(term)) => (hup, term),
                _ => {
                    log::error!("Failed to install signal handlers. Use CTRL-C to stop.");
                    if tokio::signal::ctrl_c().await.is_ok() {
                        platform.terminate();
                    }
                    return;
                }
            };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received CTRL-C. Shutting down...");
            },
            _ = sig_hup.recv() => {
                log::info!("Received SIGHUP. Shutting down...");
            },
            _ = sig_term.recv() => {
                log::info!("Received SIGTERM. Shutting down...");
            }
        }

        platform.terminate();
    });
}
