//! `Ping` and `Shutdown`.
//!
//! Shutdown is process-wide and immediate: in-flight transfers are not
//! drained and their clients see the connection drop.
//!
//! The reply to `Shutdown` is written and flushed before the delayed exit is
//! scheduled, but a flushed reply has only reached the local socket buffer.
//! On a slow or congested link the process can still exit before the client
//! reads it; the delay narrows that race without closing it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::protocol::{PingRequest, PingResponse, PING_REPLY};

/// Liveness check: the reply does not depend on the request.
pub fn ping(request: &PingRequest) -> PingResponse {
    info!(message = %request.message, "ping");
    PingResponse {
        message: PING_REPLY.to_string(),
    }
}

/// Delayed, detached process termination triggered by `Shutdown`.
#[derive(Clone)]
pub struct ShutdownHook {
    delay: Duration,
    action: Arc<dyn Fn() + Send + Sync>,
}

impl ShutdownHook {
    /// Exit the process with status 0 once `delay` has passed.
    pub fn exit_process(delay: Duration) -> Self {
        Self::with_action(delay, || {
            info!("server shutdown completed");
            std::process::exit(0);
        })
    }

    pub fn with_action(delay: Duration, action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            delay,
            action: Arc::new(action),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Start the timer. The task is not tied to the caller and is never joined
    /// by the server.
    pub fn schedule(&self) -> JoinHandle<()> {
        let delay = self.delay;
        let action = Arc::clone(&self.action);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        })
    }
}

impl fmt::Debug for ShutdownHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHook")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn ping_reply_ignores_input() {
        for message in ["", "hello", "🦀 with unicode"] {
            let reply = ping(&PingRequest {
                message: message.into(),
            });
            assert_eq!(reply.message, PING_REPLY);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_action_runs_after_delay() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hook = ShutdownHook::with_action(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(hook.delay(), Duration::from_secs(1));

        let task = hook.schedule();
        tokio::time::sleep(hook.delay() / 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        task.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
