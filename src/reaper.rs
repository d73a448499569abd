use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, Span};
use tracing_futures::Instrument;

/// Repeating poll that fires `on_expire` once the grace period has elapsed.
///
/// Dropping the timer cancels the poll loop, so storing a fresh timer in place
/// of an old one supersedes it.
pub struct IdleTimer {
    empty_since: Instant,
    _guard: DropGuard,
}

impl IdleTimer {
    pub fn arm<F, Fut>(grace: Duration, poll: Duration, on_expire: F) -> IdleTimer
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let empty_since = Instant::now();
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(
            async move {
                let mut ticker = time::interval_at(empty_since + poll, poll);
                loop {
                    tokio::select! {
                        _ = cancelled.cancelled() => {
                            debug!("Idle timer cancelled");
                            return;
                        }
                        _ = ticker.tick() => {
                            if empty_since.elapsed() >= grace {
                                on_expire().await;
                                return;
                            }
                        }
                    }
                }
            }
            .instrument(Span::current()),
        );

        IdleTimer {
            empty_since,
            _guard: token.drop_guard(),
        }
    }

    pub fn empty_since(&self) -> Instant {
        self.empty_since
    }
}
