//! Named integer counters.
//!
//! Counters must be registered before use; updates to a name that was never
//! registered are ignored. Updates can be applied directly or streamed in
//! through an inbound port and applied by [`Metrics::serve`].
//!
//! ```rust,ignore
//! let metrics = Arc::new(Metrics::new());
//! metrics.register(["forwarded", "expired"]);
//!
//! let (updates, rx) = port::inbound(16);
//! tokio::spawn({
//!     let metrics = Arc::clone(&metrics);
//!     async move { metrics.serve(rx, shutdown).await }
//! });
//! updates.send(MetricUpdate::inc("forwarded")).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::MetricsError;
use crate::port::InboundRx;

/// What to do to a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricOp {
    /// Add one.
    Inc,
    /// Subtract one.
    Dec,
    /// Replace the value.
    Set(i64),
    /// Reset to zero.
    Clear,
}

/// A single update addressed to a named counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricUpdate {
    /// Counter name.
    pub name: String,
    /// Operation to apply.
    pub op: MetricOp,
}

impl MetricUpdate {
    /// Increment `name`.
    pub fn inc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MetricOp::Inc,
        }
    }

    /// Decrement `name`.
    pub fn dec(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MetricOp::Dec,
        }
    }

    /// Set `name` to `value`.
    pub fn set(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            op: MetricOp::Set(value),
        }
    }

    /// Reset `name` to zero.
    pub fn clear(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MetricOp::Clear,
        }
    }
}

/// A store of named counters.
#[derive(Debug, Default)]
pub struct Metrics {
    values: Mutex<BTreeMap<String, i64>>,
}

impl Metrics {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, i64>> {
        // Every critical section leaves the map consistent.
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register counters, starting them at zero.
    ///
    /// Registering an existing name resets it.
    pub fn register<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values = self.values();
        for name in names {
            values.insert(name.into(), 0);
        }
    }

    /// Apply an update. Unregistered names are ignored.
    pub fn apply(&self, update: &MetricUpdate) {
        let mut values = self.values();
        let Some(value) = values.get_mut(&update.name) else {
            tracing::trace!(name = %update.name, "update for unregistered metric ignored");
            return;
        };
        *value = match update.op {
            MetricOp::Inc => value.saturating_add(1),
            MetricOp::Dec => value.saturating_sub(1),
            MetricOp::Set(new) => new,
            MetricOp::Clear => 0,
        };
    }

    /// Increment `name`.
    pub fn inc(&self, name: &str) {
        self.apply(&MetricUpdate::inc(name));
    }

    /// Decrement `name`.
    pub fn dec(&self, name: &str) {
        self.apply(&MetricUpdate::dec(name));
    }

    /// Set `name` to `value`.
    pub fn set(&self, name: &str, value: i64) {
        self.apply(&MetricUpdate::set(name, value));
    }

    /// Reset `name` to zero.
    pub fn clear(&self, name: &str) {
        self.apply(&MetricUpdate::clear(name));
    }

    /// Current value of `name`.
    pub fn value(&self, name: &str) -> Result<i64, MetricsError> {
        self.values()
            .get(name)
            .copied()
            .ok_or_else(|| MetricsError::Unknown(name.to_string()))
    }

    /// Copy of every counter, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.values().clone()
    }

    /// Apply updates from `updates` until the port closes or `shutdown` fires.
    pub async fn serve(&self, mut updates: InboundRx<MetricUpdate>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                update = updates.recv() => match update {
                    Some(update) => self.apply(&update),
                    None => break,
                },
            }
        }
        tracing::debug!("metrics updates stopped");
    }
}
