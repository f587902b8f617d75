//! Pairing of rename halves.
//!
//! Backends report a rename as two halves (`From` then `To`), as a single
//! `Both` event, or as both forms one after another. The tracker pairs
//! halves into one rename and recognises the `Both` echo of a pair it
//! already produced.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct PendingHalf {
    path: PathBuf,
    /// Backend cookie linking the two halves, when the backend has one.
    tracker: Option<usize>,
    recorded_at: Instant,
}

/// Holds `From` halves until their `To` half arrives or they expire.
#[derive(Debug)]
pub struct RenameTracker {
    pending: VecDeque<PendingHalf>,
    /// The most recent pair built from halves.
    last_pair: Option<(PathBuf, PathBuf)>,
    /// How long a `From` half may wait for its partner.
    timeout: Duration,
}

impl RenameTracker {
    /// Create a tracker with the given pairing timeout in milliseconds.
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            pending: VecDeque::new(),
            last_pair: None,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Record the old-path half of a rename.
    pub fn record_from(&mut self, path: PathBuf, tracker: Option<usize>, now: Instant) {
        self.pending.push_back(PendingHalf {
            path,
            tracker,
            recorded_at: now,
        });
    }

    /// Take the pending half that belongs with a new-path half.
    ///
    /// With a cookie, only the half carrying the same cookie (or an
    /// uncookied half) qualifies. Without one, the oldest half is used.
    pub fn take_match(&mut self, tracker: Option<usize>) -> Option<PathBuf> {
        let pos = match tracker {
            Some(cookie) => self
                .pending
                .iter()
                .position(|h| h.tracker == Some(cookie))
                .or_else(|| self.pending.iter().position(|h| h.tracker.is_none())),
            None => (!self.pending.is_empty()).then_some(0),
        }?;

        self.pending.remove(pos).map(|h| h.path)
    }

    /// Remember a pair produced from halves.
    pub fn record_pair(&mut self, from: PathBuf, to: PathBuf) {
        self.last_pair = Some((from, to));
    }

    /// Check whether a `Both` event repeats the last pair built from halves.
    ///
    /// A match consumes the remembered pair.
    pub fn is_echo(&mut self, from: &Path, to: &Path) -> bool {
        let matched = matches!(&self.last_pair, Some((f, t)) if f == from && t == to);
        if matched {
            self.last_pair = None;
        }
        matched
    }

    /// Take all halves that waited longer than the timeout.
    pub fn take_expired(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut expired = Vec::new();

        while let Some(front) = self.pending.front() {
            if now.saturating_duration_since(front.recorded_at) < self.timeout {
                break;
            }
            if let Some(half) = self.pending.pop_front() {
                expired.push(half.path);
            }
        }

        expired
    }

    /// Take every pending half, oldest first.
    pub fn take_all(&mut self) -> Vec<PathBuf> {
        self.pending.drain(..).map(|h| h.path).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drop all pending halves and the remembered pair.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.last_pair = None;
    }
}
