use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// The "polling loop + timed wait on a cancellation latch" idiom, factored
/// into one primitive and reused by the room-list poller (C4), the
/// participant poller (C3), and the keep-alive ticker (C1).
///
/// Runs `body` once per tick, then waits `interval` before the next tick,
/// returning as soon as `cancel` fires. Uses `MissedTickBehavior::Delay` so a
/// slow tick never causes a burst of catch-up ticks afterward.
pub async fn run_every<F, Fut>(interval: Duration, cancel: &CancellationToken, mut body: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; consume it so callers get a
    // `interval`-delayed first execution like the original's `closer.Wait`.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                body().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn run_every_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let ticks_clone = Arc::clone(&ticks);
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move {
            run_every(Duration::from_millis(10), &cancel_clone, || {
                let ticks = Arc::clone(&ticks_clone);
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        });

        tokio::time::advance(Duration::from_millis(35)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }
}
