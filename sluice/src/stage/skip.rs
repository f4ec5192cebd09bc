use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::{Source, Stage};
use crate::config::check_capacity;
use crate::error::StageError;
use crate::port::{self, OutboundRx, OutboundTx};

/// Forwards values only when the output can take them right away.
///
/// A value that finds the output full (or, with capacity 0, finds no consumer
/// waiting) is dropped and counted. The output closes when the input does.
pub struct Skip<T> {
    output: OutboundRx<T>,
    dropped: Arc<AtomicU64>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl<T: Send + 'static> Skip<T> {
    /// Start skipping values from `input` into an output of `capacity`.
    pub fn new(input: OutboundRx<T>, capacity: usize) -> Result<Self, StageError> {
        check_capacity("skip_out", capacity)?;
        let runtime = Handle::try_current().map_err(|_| StageError::NoRuntime)?;

        let (output_tx, output_rx) = port::outbound(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let shutdown = CancellationToken::new();
        runtime.spawn(run(
            Source::upstream(input),
            output_tx,
            Arc::clone(&dropped),
            shutdown.clone(),
        ));
        tracing::debug!(capacity, "skip started");

        Ok(Self {
            output: output_rx,
            dropped,
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    /// Wait for the next value that made it through.
    pub async fn next(&self) -> Result<T, StageError> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(StageError::Closed),
            value = self.output.recv() => value.ok_or(StageError::Closed),
        }
    }
}

impl<T> Skip<T> {
    /// Number of values dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop forwarding. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        tracing::debug!(dropped = self.dropped(), "skip closed");
    }
}

impl<T: Send + 'static> Stage<T> for Skip<T> {
    fn output(&self) -> OutboundRx<T> {
        self.output.clone()
    }

    fn close(&self) {
        Skip::close(self);
    }
}

impl<T> Drop for Skip<T> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run<T: Send + 'static>(
    mut input: Source<T>,
    mut output: OutboundTx<T>,
    dropped: Arc<AtomicU64>,
    shutdown: CancellationToken,
) {
    loop {
        let value = tokio::select! {
            _ = shutdown.cancelled() => break,
            value = input.next() => match value {
                Some(value) => value,
                None => break,
            },
        };

        let delivered = match output.try_reserve() {
            Some(slot) => slot.send(value).is_ok(),
            None => false,
        };
        if !delivered {
            let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::trace!(total, "output busy, value skipped");
        }
    }
    tracing::debug!(dropped = dropped.load(Ordering::Relaxed), "skip loop stopped");
}
