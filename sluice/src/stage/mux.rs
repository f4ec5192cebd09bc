use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::{Source, Stage};
use crate::config::check_capacity;
use crate::error::StageError;
use crate::port::{self, OutboundRx, OutboundTx};

/// Merges two outbound ports into one.
///
/// No order is imposed between the two inputs; values from a single input
/// keep their relative order. The output closes once both inputs have closed
/// or the mux is closed.
pub struct Mux<T> {
    output: OutboundRx<T>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl<T: Send + 'static> Mux<T> {
    /// Start merging `first` and `second` into an output of `capacity`.
    pub fn new(
        first: OutboundRx<T>,
        second: OutboundRx<T>,
        capacity: usize,
    ) -> Result<Self, StageError> {
        check_capacity("mux_out", capacity)?;
        let runtime = Handle::try_current().map_err(|_| StageError::NoRuntime)?;

        let (output_tx, output_rx) = port::outbound(capacity);
        let shutdown = CancellationToken::new();
        runtime.spawn(run(
            Source::upstream(first),
            Source::upstream(second),
            output_tx,
            shutdown.clone(),
        ));

        tracing::debug!(capacity, "mux started");
        Ok(Self {
            output: output_rx,
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    /// Wait for the next value from either input.
    pub async fn next(&self) -> Result<T, StageError> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(StageError::Closed),
            value = self.output.recv() => value.ok_or(StageError::Closed),
        }
    }
}

impl<T> Mux<T> {
    /// Stop merging. Idempotent; the inputs are left open.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        tracing::debug!("mux closed");
    }
}

impl<T: Send + 'static> Stage<T> for Mux<T> {
    fn output(&self) -> OutboundRx<T> {
        self.output.clone()
    }

    fn close(&self) {
        Mux::close(self);
    }
}

impl<T> Drop for Mux<T> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run<T: Send + 'static>(
    mut first: Source<T>,
    mut second: Source<T>,
    mut output: OutboundTx<T>,
    shutdown: CancellationToken,
) {
    let mut first_open = true;
    let mut second_open = true;

    while first_open || second_open {
        let value = tokio::select! {
            _ = shutdown.cancelled() => break,
            value = first.next(), if first_open => match value {
                Some(value) => value,
                None => {
                    first_open = false;
                    continue;
                }
            },
            value = second.next(), if second_open => match value {
                Some(value) => value,
                None => {
                    second_open = false;
                    continue;
                }
            },
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = output.send(value) => {
                if result.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("mux loop stopped");
}
