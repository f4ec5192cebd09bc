use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::{Source, Stage};
use crate::config::check_capacity;
use crate::error::StageError;
use crate::port::{self, InboundTx, OutboundRx, OutboundTx};

/// An order-preserving buffer between a producer and a consumer.
///
/// Built with [`Buffer::new`], the buffer owns an inbound port of the given
/// capacity and offers values on a rendezvous output. Built with
/// [`Buffer::from_stage`], it reads another stage's output and buffers up to
/// `capacity` values on its own output instead. In that mode closing the
/// buffer also closes the upstream stage.
pub struct Buffer<T> {
    input: Option<InboundTx<T>>,
    output: OutboundRx<T>,
    upstream: Option<Box<dyn Stage<T>>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl<T: Send + 'static> Buffer<T> {
    /// Create a buffer with an inbound port of `capacity`.
    pub fn new(capacity: usize) -> Result<Self, StageError> {
        check_capacity("buffer_in", capacity)?;
        let runtime = Handle::try_current().map_err(|_| StageError::NoRuntime)?;

        let (input_tx, input_rx) = port::inbound(capacity);
        let (output_tx, output_rx) = port::outbound(0);
        let shutdown = CancellationToken::new();
        runtime.spawn(run(Source::Port(input_rx), output_tx, shutdown.clone()));

        tracing::debug!(capacity, "buffer started");
        Ok(Self {
            input: Some(input_tx),
            output: output_rx,
            upstream: None,
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    /// Chain a buffer behind `upstream`, buffering up to `capacity` values.
    ///
    /// The buffer takes ownership of `upstream`.
    pub fn from_stage<S>(capacity: usize, upstream: S) -> Result<Self, StageError>
    where
        S: Stage<T> + 'static,
    {
        check_capacity("buffer_out", capacity)?;
        let runtime = Handle::try_current().map_err(|_| StageError::NoRuntime)?;

        let (output_tx, output_rx) = port::outbound(capacity);
        let shutdown = CancellationToken::new();
        let source = Source::upstream(upstream.output());
        runtime.spawn(run(source, output_tx, shutdown.clone()));

        tracing::debug!(capacity, "buffer chained to upstream stage");
        Ok(Self {
            input: None,
            output: output_rx,
            upstream: Some(Box::new(upstream)),
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    /// Producer handle for the buffer's own inbound port.
    ///
    /// `None` for buffers built with [`from_stage`](Self::from_stage).
    pub fn input(&self) -> Option<InboundTx<T>> {
        self.input.clone()
    }

    /// Push a value through the buffer's own inbound port.
    pub async fn send(&self, value: T) -> Result<(), StageError> {
        let input = match &self.input {
            Some(input) if !self.is_closed() => input,
            _ => return Err(StageError::Closed),
        };
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(StageError::Closed),
            result = input.send(value) => result.map_err(StageError::from),
        }
    }

    /// Wait for the next value.
    pub async fn next(&self) -> Result<T, StageError> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(StageError::Closed),
            value = self.output.recv() => value.ok_or(StageError::Closed),
        }
    }
}

impl<T> Buffer<T> {
    /// Shut the buffer and any upstream stage down. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(upstream) = &self.upstream {
            upstream.close();
        }
        self.shutdown.cancel();
        tracing::debug!("buffer closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T: Send + 'static> Stage<T> for Buffer<T> {
    fn output(&self) -> OutboundRx<T> {
        self.output.clone()
    }

    fn close(&self) {
        Buffer::close(self);
    }
}

impl<T> Drop for Buffer<T> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run<T: Send + 'static>(
    mut source: Source<T>,
    mut output: OutboundTx<T>,
    shutdown: CancellationToken,
) {
    loop {
        let value = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            value = source.next() => match value {
                Some(value) => value,
                None => break,
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
    tracing::debug!("buffer loop stopped");
}
