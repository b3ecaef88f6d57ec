//! Intervention watcher: polls the run directory for PAUSE/STOP sentinel
//! files and phase-spec changes (spec 4.11).
//!
//! A lightweight stat-based poller rather than an inotify watch, matching
//! the run directory's already-polling checkpoint-staleness design; grounded
//! on the deleted `hooks/` module's event-type enum shape, with the actual
//! hook-command execution dropped since it has no spec counterpart.

use crate::config::RunPaths;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterventionEvent {
    Pause,
    Resume,
    Stop,
    PhaseSpecChanged(PathBuf),
}

/// Default polling interval for the background watcher task (spec 4.11).
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Polls `PAUSE`/`STOP` sentinel files and phase-spec mtimes under a run
/// directory, yielding the transitions since the last `poll()` call.
pub struct InterventionWatcher {
    paths: RunPaths,
    was_paused: bool,
    was_stopped: bool,
    spec_mtimes: HashMap<PathBuf, SystemTime>,
}

impl InterventionWatcher {
    pub fn new(paths: RunPaths) -> Self {
        Self {
            paths,
            was_paused: false,
            was_stopped: false,
            spec_mtimes: HashMap::new(),
        }
    }

    /// Single poll tick: compares current filesystem state against the last
    /// observed state and returns every transition that occurred.
    pub fn poll(&mut self) -> Vec<InterventionEvent> {
        let mut events = Vec::new();

        let stopped = self.paths.stop_path().exists();
        if stopped && !self.was_stopped {
            events.push(InterventionEvent::Stop);
        }
        self.was_stopped = stopped;

        let paused = self.paths.pause_path().exists();
        if paused && !self.was_paused {
            events.push(InterventionEvent::Pause);
        } else if !paused && self.was_paused {
            events.push(InterventionEvent::Resume);
        }
        self.was_paused = paused;

        if let Ok(entries) = std::fs::read_dir(self.paths.phases_dir()) {
            let mut seen = std::collections::HashSet::new();
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                seen.insert(path.clone());
                let Ok(meta) = entry.metadata() else { continue };
                let Ok(mtime) = meta.modified() else { continue };
                let changed = match self.spec_mtimes.get(&path) {
                    Some(prev) => *prev != mtime,
                    None => false, // first sighting is not a "change"
                };
                self.spec_mtimes.insert(path.clone(), mtime);
                if changed {
                    events.push(InterventionEvent::PhaseSpecChanged(path));
                }
            }
            self.spec_mtimes.retain(|p, _| seen.contains(p));
        }

        events
    }

    pub fn is_paused(&self) -> bool {
        self.was_paused
    }

    pub fn is_stopped(&self) -> bool {
        self.was_stopped
    }
}
