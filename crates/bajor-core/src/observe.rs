//! Structured pipeline events and the observers that receive them.
//!
//! Pipeline components take an `Arc<dyn Observer>` instead of logging
//! through the global subscriber, so tests can assert on what was reported
//! and embedders can route events elsewhere.

use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, error, info, warn};

/// Something worth reporting that happened inside the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A transient fetch failure that will be retried after `delay`.
    FetchRetry {
        url: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// A fetch failed for good (status rejected or retries exhausted).
    FetchFailed { url: String, error: String },
    /// An image payload could not be decoded.
    DecodeFailed { url: String, error: String },
    /// One full forward pass over the catalog finished.
    PassComplete {
        pass: usize,
        n_passes: usize,
        n_galaxies: usize,
    },
    RunStarted {
        n_galaxies: usize,
        n_samples: usize,
        started_at: String,
    },
    RunFinished {
        shape: [usize; 3],
        elapsed: Duration,
        finished_at: String,
    },
    /// Output suffix not recognised; the default writer is used instead.
    OutputFallback { path: String, format: String },
    OutputWritten { path: String, format: String },
}

pub trait Observer: Send + Sync {
    fn event(&self, event: &Event);
}

/// Forwards every event to `tracing` with structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn event(&self, event: &Event) {
        match event {
            Event::FetchRetry {
                url,
                attempt,
                delay,
                error,
            } => debug!(url = %url, attempt, delay_ms = delay.as_millis() as u64, error = %error, "retrying fetch"),
            Event::FetchFailed { url, error } => error!(url = %url, error = %error, "cannot load"),
            Event::DecodeFailed { url, error } => {
                error!(url = %url, error = %error, "cannot decode")
            }
            Event::PassComplete {
                pass,
                n_passes,
                n_galaxies,
            } => info!(pass, n_passes, n_galaxies, "forward pass complete"),
            Event::RunStarted {
                n_galaxies,
                n_samples,
                started_at,
            } => info!(n_galaxies, n_samples, started_at = %started_at, "beginning predictions"),
            Event::RunFinished {
                shape,
                elapsed,
                finished_at,
            } => info!(
                shape = ?shape,
                elapsed_secs = elapsed.as_secs_f64(),
                finished_at = %finished_at,
                "predictions complete"
            ),
            Event::OutputFallback { path, format } => warn!(
                path = %path,
                format = %format,
                "save format not recognised, using default"
            ),
            Event::OutputWritten { path, format } => {
                info!(path = %path, format = %format, "predictions saved")
            }
        }
    }
}

/// Keeps every event in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryObserver {
    events: Mutex<Vec<Event>>,
}

impl MemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|e| pred(e))
            .count()
    }
}

impl Observer for MemoryObserver {
    fn event(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn memory_observer_records_in_order() {
        let obs = MemoryObserver::new();
        obs.event(&Event::FetchFailed {
            url: "http://a/1.jpg".into(),
            error: "500".into(),
        });
        obs.event(&Event::OutputWritten {
            path: "out.csv".into(),
            format: "csv".into(),
        });

        let events = obs.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::FetchFailed { url, .. } if url == "http://a/1.jpg"));
        assert_eq!(obs.count(|e| matches!(e, Event::OutputWritten { .. })), 1);
    }

    #[test]
    fn observers_are_object_safe() {
        let observers: Vec<Arc<dyn Observer>> =
            vec![Arc::new(TracingObserver), Arc::new(MemoryObserver::new())];
        for obs in observers {
            obs.event(&Event::PassComplete {
                pass: 1,
                n_passes: 1,
                n_galaxies: 0,
            });
        }
    }
}
