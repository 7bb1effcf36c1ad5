// ESX Doctor - app/sweeper.rs
//
// Session expiration sweep on a background thread.
//
// The thread sleeps in small sub-intervals so the cancel flag is honoured
// within SWEEP_CANCEL_CHECK_INTERVAL_MS of being set, and runs one sweep per
// interval. Stopping joins the thread so a clean shutdown never races a
// sweep against registry teardown.

use crate::app::registry::SessionRegistry;
use crate::util::constants::SWEEP_CANCEL_CHECK_INTERVAL_MS;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Handle to a running sweep thread.
pub struct Sweeper {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the sweep thread over `registry`, sweeping every `interval`.
    pub fn start(registry: Arc<SessionRegistry>, interval: Duration) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);

        let thread = std::thread::spawn(move || {
            tracing::info!(interval_secs = interval.as_secs(), "Expiration sweep started");
            let check = Duration::from_millis(SWEEP_CANCEL_CHECK_INTERVAL_MS);
            let mut slept = Duration::ZERO;
            loop {
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                std::thread::sleep(check.min(interval));
                slept += check;
                if slept >= interval {
                    slept = Duration::ZERO;
                    let evicted = registry.sweep(Utc::now());
                    if evicted > 0 {
                        tracing::info!(evicted, "Expired sessions swept");
                    }
                }
            }
            tracing::debug!("Expiration sweep stopped");
        });

        Self {
            cancel,
            thread: Some(thread),
        }
    }

    /// Request the thread to stop and wait for it to exit.
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Block the calling thread until the sweeper exits (it only exits after
    /// `stop`, so this effectively parks a server main thread).
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweeper_stops_promptly() {
        let registry = Arc::new(SessionRegistry::new(None, 24));
        let mut sweeper = Sweeper::start(Arc::clone(&registry), Duration::from_secs(3600));
        let started = std::time::Instant::now();
        sweeper.stop();
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "stop must not wait out the sweep interval"
        );
    }
}
