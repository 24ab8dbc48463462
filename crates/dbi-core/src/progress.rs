//! Per-file transfer progress tracking.
//!
//! The tracker owns all progress state for a session and reports every
//! change to the observer as a [`DbiEvent`]. Rate and ETA are resampled at
//! most every [`RATE_SAMPLE_INTERVAL_MS`] so advancing by many small chunks
//! stays cheap.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::events::{DbiEvent, DbiObserver};
use crate::protocol::constants::RATE_SAMPLE_INTERVAL_MS;

/// Progress of one file.
#[derive(Debug, Clone)]
pub struct FileProgress {
    pub total_size: u64,
    pub transferred: u64,
    pub started_at: Instant,
    last_sample_at: Instant,
    last_sample_bytes: u64,
    rate: Option<f64>,
}

impl FileProgress {
    fn new(total_size: u64, initial_offset: u64) -> Self {
        let now = Instant::now();
        Self {
            total_size,
            transferred: initial_offset.min(total_size),
            started_at: now,
            last_sample_at: now,
            last_sample_bytes: initial_offset.min(total_size),
            rate: None,
        }
    }

    fn advance(&mut self, delta: u64, sample_interval: Duration) {
        self.transferred = self.transferred.saturating_add(delta);
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_sample_at);
        if elapsed >= sample_interval && elapsed > Duration::ZERO {
            let bytes = self.transferred.saturating_sub(self.last_sample_bytes);
            self.rate = Some(bytes as f64 / elapsed.as_secs_f64());
            self.last_sample_at = now;
            self.last_sample_bytes = self.transferred;
        }
    }

    /// Last sampled rate in bytes per second.
    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    /// Estimated time to finish the whole file at the sampled rate.
    pub fn eta(&self) -> Option<Duration> {
        let rate = self.rate.filter(|r| *r > 0.0)?;
        let left = self.total_size.saturating_sub(self.transferred);
        Some(Duration::from_secs_f64(left as f64 / rate))
    }
}

/// Session-wide transfer state.
///
/// A file is tracked from its first range request until the range reaching
/// end-of-file has been delivered; after that it is completed for the rest of
/// the session and never tracked again.
pub struct TransferTracker<O: DbiObserver> {
    observer: Arc<O>,
    total_files: usize,
    files: HashMap<String, FileProgress>,
    completed: HashSet<String>,
    started_at: Option<Instant>,
    sample_interval: Duration,
}

impl<O: DbiObserver> TransferTracker<O> {
    pub fn new(observer: Arc<O>, total_files: usize) -> Self {
        Self {
            observer,
            total_files,
            files: HashMap::new(),
            completed: HashSet::new(),
            started_at: None,
            sample_interval: Duration::from_millis(RATE_SAMPLE_INTERVAL_MS),
        }
    }

    /// Override the rate sampling interval.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Mark the start of the transfer. Only the first call has an effect.
    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
            self.observer.on_event(&DbiEvent::TransferStarted {
                total_files: self.total_files,
            });
        }
    }

    /// Start tracking `name`.
    ///
    /// Idempotent: an already tracked file keeps its state, and a completed
    /// file yields `None` without being tracked again.
    pub fn begin_file(
        &mut self,
        name: &str,
        total_size: u64,
        initial_offset: u64,
    ) -> Option<&FileProgress> {
        if self.completed.contains(name) {
            return None;
        }
        if !self.files.contains_key(name) {
            self.files.insert(
                name.to_string(),
                FileProgress::new(total_size, initial_offset),
            );
            self.observer.on_event(&DbiEvent::FileBegin {
                name: name.to_string(),
                total_size,
                initial_offset,
            });
        }
        self.files.get(name)
    }

    /// Record `delta` more bytes delivered for a tracked file.
    pub fn advance(&mut self, name: &str, delta: u64) {
        let Some(progress) = self.files.get_mut(name) else {
            return;
        };
        progress.advance(delta, self.sample_interval);
        self.observer.on_event(&DbiEvent::Progress {
            name: name.to_string(),
            delta,
            transferred: progress.transferred,
            total: progress.total_size,
            rate: progress.rate(),
            eta: progress.eta(),
        });
    }

    /// Move a tracked file to the completed set.
    ///
    /// Returns `false` (and emits nothing) if the file was not being tracked.
    pub fn complete_file(&mut self, name: &str) -> bool {
        if self.files.remove(name).is_none() {
            return false;
        }
        self.completed.insert(name.to_string());
        self.observer.on_event(&DbiEvent::FileComplete {
            name: name.to_string(),
            files_completed: self.files_completed(),
            total_files: self.total_files,
            elapsed: self.elapsed(),
        });
        tracing::debug!(
            in_flight = ?self.files.keys().collect::<Vec<_>>(),
            completed = self.completed.len(),
            total_files = self.total_files,
            "Progress tracking state"
        );
        true
    }

    pub fn is_completed(&self, name: &str) -> bool {
        self.completed.contains(name)
    }

    pub fn progress(&self, name: &str) -> Option<&FileProgress> {
        self.files.get(name)
    }

    pub fn files_completed(&self) -> usize {
        self.completed.len().min(self.total_files)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingObserver;

    fn tracker() -> (Arc<CollectingObserver>, TransferTracker<CollectingObserver>) {
        let observer = Arc::new(CollectingObserver::new());
        let tracker = TransferTracker::new(observer.clone(), 2);
        (observer, tracker)
    }

    #[test]
    fn test_start_is_emitted_once() {
        let (observer, mut tracker) = tracker();
        tracker.start();
        tracker.start();
        assert_eq!(
            observer.events(),
            vec![DbiEvent::TransferStarted { total_files: 2 }]
        );
    }

    #[test]
    fn test_begin_file_is_idempotent() {
        let (observer, mut tracker) = tracker();
        assert!(tracker.begin_file("a.nsp", 100, 10).is_some());
        tracker.advance("a.nsp", 5);

        let again = tracker.begin_file("a.nsp", 100, 0).unwrap();
        assert_eq!(again.transferred, 15);

        let begins = observer
            .events()
            .into_iter()
            .filter(|e| matches!(e, DbiEvent::FileBegin { .. }))
            .count();
        assert_eq!(begins, 1);
    }

    #[test]
    fn test_completed_file_is_never_tracked_again() {
        let (observer, mut tracker) = tracker();
        tracker.start();
        tracker.begin_file("a.nsp", 100, 0);
        tracker.advance("a.nsp", 100);
        assert!(tracker.complete_file("a.nsp"));

        assert!(tracker.is_completed("a.nsp"));
        assert!(tracker.begin_file("a.nsp", 100, 0).is_none());
        assert!(!tracker.complete_file("a.nsp"));
        assert_eq!(tracker.files_completed(), 1);

        let events = observer.events();
        let completes = events
            .iter()
            .filter(|e| matches!(e, DbiEvent::FileComplete { .. }))
            .count();
        assert_eq!(completes, 1);
        assert!(matches!(
            events.last(),
            Some(DbiEvent::FileComplete {
                files_completed: 1,
                total_files: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_advance_untracked_is_ignored() {
        let (observer, mut tracker) = tracker();
        tracker.advance("ghost.nsp", 10);
        assert!(observer.events().is_empty());
    }

    #[test]
    fn test_rate_is_sampled_on_interval() {
        let (_observer, tracker) = tracker();
        let mut tracker = tracker.with_sample_interval(Duration::from_secs(3600));
        tracker.begin_file("a.nsp", 1000, 0);
        tracker.advance("a.nsp", 10);
        assert!(tracker.progress("a.nsp").unwrap().rate().is_none());
        assert!(tracker.progress("a.nsp").unwrap().eta().is_none());
    }

    #[test]
    fn test_rate_and_eta_after_sample() {
        let (_observer, tracker) = tracker();
        let mut tracker = tracker.with_sample_interval(Duration::ZERO);
        tracker.begin_file("a.nsp", 1000, 0);
        std::thread::sleep(Duration::from_millis(5));
        tracker.advance("a.nsp", 500);

        let progress = tracker.progress("a.nsp").unwrap();
        assert!(progress.rate().unwrap() > 0.0);
        assert!(progress.eta().is_some());
    }
}
