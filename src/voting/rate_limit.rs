use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::RateLimitConfig;

// Full sweep of idle identities every this many checks
const SWEEP_EVERY: u64 = 256;

#[derive(Default)]
struct Hits {
    by_voter: HashMap<String, VecDeque<Instant>>,
    checks: u64,
}

/// Sliding-window throttle on vote submissions, keyed by voter identity.
///
/// Runs ahead of the tally engine and knows nothing about rounds.
pub struct AccessGate {
    max_requests: usize,
    window: Duration,
    hits: Mutex<Hits>,
}

impl AccessGate {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: config.window,
            hits: Mutex::new(Hits::default()),
        }
    }

    /// Records a submission attempt; `true` means the voter must be turned away.
    pub async fn is_rate_limited(&self, voter: &str) -> bool {
        self.check_at(voter, Instant::now()).await
    }

    /// Rejected attempts are not recorded, so a throttled voter regains access
    /// as soon as their oldest accepted hit leaves the window.
    pub async fn check_at(&self, voter: &str, now: Instant) -> bool {
        let mut hits = self.hits.lock().await;

        // Every so often, forget voters that have gone quiet
        hits.checks += 1;
        if hits.checks % SWEEP_EVERY == 0 {
            self.sweep(&mut hits.by_voter, now);
        }

        let entry = hits.by_voter.entry(voter.to_string()).or_default();
        // Drop hits that slid out of the window
        while entry
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            entry.pop_front();
        }

        if entry.len() >= self.max_requests {
            if entry.is_empty() {
                hits.by_voter.remove(voter);
            }
            return true;
        }
        entry.push_back(now);
        false
    }

    /// Drops identities with no hit inside the window. Returns how many were removed.
    pub async fn prune_idle(&self, now: Instant) -> usize {
        let mut hits = self.hits.lock().await;
        self.sweep(&mut hits.by_voter, now)
    }

    fn sweep(&self, by_voter: &mut HashMap<String, VecDeque<Instant>>, now: Instant) -> usize {
        let before = by_voter.len();
        by_voter.retain(|_, entry| {
            entry
                .back()
                .is_some_and(|t| now.saturating_duration_since(*t) < self.window)
        });
        before - by_voter.len()
    }

    pub async fn tracked_voters(&self) -> usize {
        self.hits.lock().await.by_voter.len()
    }
}
