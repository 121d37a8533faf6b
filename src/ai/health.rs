//! Backend Health Cache
//!
//! Process-local, TTL-bounded memo of backend availability.
//!
//! ## Semantics
//!
//! - A live entry (younger than the TTL) is trusted without any network call.
//! - A stale or missing entry is **unknown** and fails open: the caller is
//!   allowed through and the real call surfaces the failure, which is then
//!   recorded.
//!
//! ```text
//! record(false) at T --> skipped until T + ttl --> allowed again (fresh check)
//! ```
//!
//! Entries live in a `DashMap` keyed by backend name, so concurrent runs can
//! read and update without a global lock. Time comes from an injectable
//! [`Clock`] so TTL behavior is testable without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::constants::health as health_constants;

// =============================================================================
// Clock
// =============================================================================

/// Monotonic time source
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// =============================================================================
// Health Cache
// =============================================================================

/// Cached view of one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Live entry: backend answered recently
    Available,
    /// Live entry: backend failed recently; skip until the entry expires
    Unavailable { remaining: Duration },
    /// No live entry; callers fail open
    Unknown,
}

#[derive(Debug, Clone, Copy)]
struct HealthEntry {
    available: bool,
    checked_at: Instant,
}

/// TTL-based availability memo shared by every router call site
pub struct HealthCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, HealthEntry>,
    skips: AtomicU64,
    stale_lookups: AtomicU64,
}

impl std::fmt::Debug for HealthCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Default for HealthCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(health_constants::DEFAULT_TTL_SECS))
    }
}

impl HealthCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: DashMap::new(),
            skips: AtomicU64::new(0),
            stale_lookups: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current cached view of `backend`
    pub fn state(&self, backend: &str) -> HealthState {
        let Some(entry) = self.entries.get(backend).map(|e| *e) else {
            return HealthState::Unknown;
        };

        let age = self.clock.now().saturating_duration_since(entry.checked_at);
        if age >= self.ttl {
            self.stale_lookups.fetch_add(1, Ordering::Relaxed);
            return HealthState::Unknown;
        }

        if entry.available {
            HealthState::Available
        } else {
            HealthState::Unavailable {
                remaining: self.ttl - age,
            }
        }
    }

    /// Fail-open availability check; only a live negative entry says no
    pub fn is_available(&self, backend: &str) -> bool {
        match self.state(backend) {
            HealthState::Unavailable { remaining } => {
                self.skips.fetch_add(1, Ordering::Relaxed);
                debug!(
                    backend = %backend,
                    remaining_ms = remaining.as_millis() as u64,
                    "Backend marked unavailable in health cache"
                );
                false
            }
            HealthState::Available | HealthState::Unknown => true,
        }
    }

    /// Record the outcome of a real call or health check
    pub fn record(&self, backend: &str, available: bool) {
        let entry = HealthEntry {
            available,
            checked_at: self.clock.now(),
        };
        let previous = self.entries.insert(backend.to_string(), entry);

        if previous.map(|p| p.available) != Some(available) {
            debug!(backend = %backend, available, "Health cache updated");
        }
    }

    /// Drop every entry (all backends become unknown)
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Snapshot for diagnostics
    pub fn stats(&self) -> HealthCacheStats {
        let now = self.clock.now();
        let mut backends: Vec<BackendHealth> = self
            .entries
            .iter()
            .map(|entry| {
                let age = now.saturating_duration_since(entry.checked_at);
                BackendHealth {
                    backend: entry.key().clone(),
                    available: entry.available,
                    age,
                    stale: age >= self.ttl,
                }
            })
            .collect();
        backends.sort_by(|a, b| a.backend.cmp(&b.backend));

        HealthCacheStats {
            backends,
            skips: self.skips.load(Ordering::Relaxed),
            stale_lookups: self.stale_lookups.load(Ordering::Relaxed),
        }
    }
}

/// One backend's cached state
#[derive(Debug, Clone)]
pub struct BackendHealth {
    pub backend: String,
    pub available: bool,
    pub age: Duration,
    pub stale: bool,
}

/// Statistics for monitoring the health cache
#[derive(Debug, Clone)]
pub struct HealthCacheStats {
    pub backends: Vec<BackendHealth>,
    pub skips: u64,
    pub stale_lookups: u64,
}

impl HealthCacheStats {
    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        let entries: Vec<String> = self
            .backends
            .iter()
            .map(|b| {
                format!(
                    "{}={}{}",
                    b.backend,
                    if b.available { "up" } else { "down" },
                    if b.stale { "(stale)" } else { "" }
                )
            })
            .collect();

        format!(
            "[health] {} | skips={} stale_lookups={}",
            if entries.is_empty() {
                "empty".to_string()
            } else {
                entries.join(" ")
            },
            self.skips,
            self.stale_lookups
        )
    }
}
