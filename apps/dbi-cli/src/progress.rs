//! Terminal progress rendering with indicatif.

use std::collections::HashMap;
use std::sync::Mutex;

use dbi_core::events::{DbiEvent, DbiObserver, TracingObserver};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

const FILE_TEMPLATE: &str =
    "{msg:30!} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} ({eta})";
const OVERALL_TEMPLATE: &str = "{prefix:.bold} [{elapsed_precise}] {pos}/{len} files";

/// One bar per file under a [`MultiProgress`], plus an overview line when
/// more than one file is offered. Everything else goes to tracing.
pub struct ProgressObserver {
    multi: MultiProgress,
    overall: Option<ProgressBar>,
    bars: Mutex<HashMap<String, ProgressBar>>,
    fallback: TracingObserver,
}

impl ProgressObserver {
    pub fn new(total_files: usize) -> Self {
        let multi = MultiProgress::new();
        let overall = (total_files > 1).then(|| {
            let bar = multi.add(ProgressBar::new(total_files as u64));
            bar.set_style(style(OVERALL_TEMPLATE));
            bar.set_prefix("Overall");
            bar
        });
        Self {
            multi,
            overall,
            bars: Mutex::new(HashMap::new()),
            fallback: TracingObserver,
        }
    }

    /// Leave finished bars on screen and drop the unfinished ones.
    pub fn finish(&self) {
        if let Ok(mut bars) = self.bars.lock() {
            for (_, bar) in bars.drain() {
                bar.abandon();
            }
        }
        if let Some(overall) = &self.overall {
            overall.abandon();
        }
    }

    fn begin(&self, name: &str, total_size: u64, initial_offset: u64) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        let bar = ProgressBar::new(total_size);
        let bar = match &self.overall {
            Some(overall) => self.multi.insert_before(overall, bar),
            None => self.multi.add(bar),
        };
        bar.set_style(style(FILE_TEMPLATE));
        bar.set_message(name.to_string());
        bar.set_position(initial_offset);
        bars.insert(name.to_string(), bar);
    }

    fn advance(&self, name: &str, transferred: u64) {
        if let Ok(bars) = self.bars.lock()
            && let Some(bar) = bars.get(name)
        {
            bar.set_position(transferred);
        }
    }

    fn complete(&self, name: &str, files_completed: usize) {
        if let Ok(mut bars) = self.bars.lock()
            && let Some(bar) = bars.remove(name)
        {
            bar.finish_with_message(format!("{} done", name));
        }
        if let Some(overall) = &self.overall {
            overall.set_position(files_completed as u64);
        }
    }
}

impl DbiObserver for ProgressObserver {
    fn on_event(&self, event: &DbiEvent) {
        match event {
            DbiEvent::FileBegin {
                name,
                total_size,
                initial_offset,
            } => self.begin(name, *total_size, *initial_offset),
            DbiEvent::Progress {
                name, transferred, ..
            } => self.advance(name, *transferred),
            DbiEvent::FileComplete {
                name,
                files_completed,
                ..
            } => {
                self.complete(name, *files_completed);
                self.multi.suspend(|| self.fallback.on_event(event));
            }
            DbiEvent::Packet { .. } if !packets_traced() => {}
            _ => self.multi.suspend(|| self.fallback.on_event(event)),
        }
    }
}

/// Packet events fire once per USB transfer; the bars are only suspended for
/// them when the tracing fallback would actually print something.
fn packets_traced() -> bool {
    tracing::enabled!(target: "dbi_core::events", tracing::Level::TRACE)
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .map(|s| s.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbi_core::events::PacketDirection;
    use tracing_subscriber::EnvFilter;

    fn packet() -> DbiEvent {
        DbiEvent::Packet {
            direction: PacketDirection::Rx,
            length: 16,
            data: vec![0; 16],
        }
    }

    #[test]
    fn test_packets_skipped_unless_traced() {
        let quiet = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_writer(std::io::sink)
            .finish();
        tracing::subscriber::with_default(quiet, || assert!(!packets_traced()));

        let traced = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("dbi_core=trace"))
            .with_writer(std::io::sink)
            .finish();
        tracing::subscriber::with_default(traced, || assert!(packets_traced()));
    }

    #[test]
    fn test_packet_events_leave_bars_alone() {
        let observer = ProgressObserver::new(1);
        observer.on_event(&DbiEvent::FileBegin {
            name: "a.nsp".into(),
            total_size: 100,
            initial_offset: 0,
        });
        observer.on_event(&packet());
        observer.on_event(&DbiEvent::Progress {
            name: "a.nsp".into(),
            delta: 40,
            transferred: 40,
            total: 100,
            rate: None,
            eta: None,
        });

        let bars = observer.bars.lock().unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars["a.nsp"].position(), 40);
    }
}
