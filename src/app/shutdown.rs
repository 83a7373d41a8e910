#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancels `token` on SIGINT or SIGTERM.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    token: CancellationToken,
}

impl SignalHandler {
    pub fn install() -> Self {
        let token = CancellationToken::new();
        let handler = Self {
            token: token.clone(),
        };
        tokio::spawn(async move {
            if wait_for_signal().await {
                token.cancel();
            }
        });
        handler
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

/// `false` when no signal can be listened for.
#[cfg(unix)]
async fn wait_for_signal() -> bool {
    let mut sigterm = match unix_signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            error!("Failed to install SIGTERM handler: {}", err);
            return ctrl_c().await;
        }
    };
    tokio::select! {
        received = ctrl_c() => received,
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
            true
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    ctrl_c().await
}

async fn ctrl_c() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received SIGINT (Ctrl+C), shutting down");
            true
        }
        Err(err) => {
            error!("Failed to listen for SIGINT: {}", err);
            false
        }
    }
}
