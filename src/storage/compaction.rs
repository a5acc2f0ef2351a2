use std::thread::{self, JoinHandle};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::warn;
use parking_lot::Mutex;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::index::posting_store::PostingStats;

/// Policy for deciding when retired postings are worth reclaiming
pub trait CompactionPolicy: Send + Sync {
    fn should_compact(&self, stats: &PostingStats) -> bool;
}

/// Compacts once retired postings exceed a fraction of the live ones
#[derive(Debug, Clone, Copy)]
pub struct RatioCompactionPolicy {
    pub threshold: f64,
    pub min_retired: u64,
}

impl RatioCompactionPolicy {
    pub fn from_config(config: &Config) -> Self {
        RatioCompactionPolicy {
            threshold: config.compaction_threshold,
            min_retired: config.compaction_min_retired,
        }
    }
}

impl Default for RatioCompactionPolicy {
    fn default() -> Self {
        RatioCompactionPolicy {
            threshold: 0.5,
            min_retired: 1024,
        }
    }
}

impl CompactionPolicy for RatioCompactionPolicy {
    fn should_compact(&self, stats: &PostingStats) -> bool {
        stats.retired_postings >= self.min_retired.max(1)
            && stats.retired_ratio() > self.threshold
    }
}

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub lists_rewritten: usize,
    pub postings_dropped: usize,
}

enum Signal {
    Run,
    Shutdown,
}

/// Background thread running compaction passes on request. Requests that
/// arrive while a pass is queued are coalesced.
pub struct Compactor {
    sender: Sender<Signal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Compactor {
    pub fn start<F>(pass: F) -> Result<Self>
    where
        F: Fn() -> Result<CompactionReport> + Send + 'static,
    {
        let (sender, receiver) = channel::bounded(1);
        let handle = thread::Builder::new()
            .name("pathdex-compaction".to_string())
            .spawn(move || Self::run(receiver, pass))?;

        Ok(Compactor {
            sender,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn run<F>(receiver: Receiver<Signal>, pass: F)
    where
        F: Fn() -> Result<CompactionReport>,
    {
        while let Ok(Signal::Run) = receiver.recv() {
            if let Err(e) = pass() {
                warn!("background compaction failed: {}", e);
            }
        }
    }

    pub fn trigger(&self) {
        match self.sender.try_send(Signal::Run) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => warn!("compaction thread is not running"),
        }
    }

    pub fn shutdown(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        // A queued Run may occupy the slot; a blocking send waits for it to drain.
        let _ = self.sender.send(Signal::Shutdown);
        if handle.join().is_err() {
            warn!("compaction thread panicked");
        }
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
