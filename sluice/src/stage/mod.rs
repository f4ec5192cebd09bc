//! Pipeline stages that can be chained through their output ports.
//!
//! A stage is anything that owns an outbound port and can be closed. Stages
//! are chained by handing one stage's output to the next: [`Buffer`] can even
//! take ownership of its upstream stage so that closing the tail of a
//! pipeline closes the whole chain.
//!
//! ```text
//!  container ──▶ Buffer::from_stage ──▶ Skip ──▶ consumer
//!   tracker  ──┐
//!              ├─▶ Mux ──▶ consumer
//!   buffer   ──┘
//! ```

mod buffer;
mod mux;
mod skip;

pub use buffer::Buffer;
pub use mux::Mux;
pub use skip::Skip;

use std::fmt;
use std::hash::Hash;

use crate::container::OrderedKeyedContainer;
use crate::deadline::DeadlineItem;
use crate::keyed::Keyed;
use crate::port::{InboundRx, OutboundRx, Request};
use crate::tracker::DeliveryTracker;

/// A component with an output port that can be chained into a pipeline.
pub trait Stage<T>: Send + Sync {
    /// A consumer handle for this stage's output.
    fn output(&self) -> OutboundRx<T>;

    /// Shut the stage down. Must be idempotent.
    fn close(&self);
}

impl<T> Stage<T> for OrderedKeyedContainer<T>
where
    T: Keyed + Send + 'static,
{
    fn output(&self) -> OutboundRx<T> {
        self.output_port()
    }

    fn close(&self) {
        OrderedKeyedContainer::close(self);
    }
}

impl<K, V> Stage<DeadlineItem<K, V>> for DeliveryTracker<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    fn output(&self) -> OutboundRx<DeadlineItem<K, V>> {
        self.obj_out()
    }

    fn close(&self) {
        DeliveryTracker::close(self);
    }
}

/// Where a stage's control loop reads from.
pub(crate) enum Source<T> {
    /// The stage's own inbound port.
    Port(InboundRx<T>),
    /// Another stage's output. The request survives cancellation of `next`.
    Upstream {
        rx: OutboundRx<T>,
        request: Option<Request<T>>,
    },
}

impl<T: Send + 'static> Source<T> {
    pub(crate) fn upstream(rx: OutboundRx<T>) -> Self {
        Source::Upstream { rx, request: None }
    }

    /// Next value, or `None` once the source is closed. Cancel safe.
    pub(crate) async fn next(&mut self) -> Option<T> {
        match self {
            Source::Port(rx) => rx.recv().await,
            Source::Upstream { rx, request } => {
                let pending = request.get_or_insert_with(|| rx.request());
                let value = pending.await;
                *request = None;
                value
            }
        }
    }
}
