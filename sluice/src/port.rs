//! Bounded in-process message ports.
//!
//! Every component talks to the outside world only through ports. A port has
//! an owning control loop on one side and any number of producers or
//! consumers on the other.
//!
//! - **Inbound** ports carry values *into* a loop (`Add`, `Delete`, `ObjIn`,
//!   `AckIn`). Producers hold a cloneable [`InboundTx`], the loop holds the
//!   single [`InboundRx`].
//! - **Outbound** ports carry values *out of* a loop (`Output`, `ObjOut`). The
//!   loop holds the single [`OutboundTx`], consumers hold cloneable
//!   [`OutboundRx`] handles.
//!
//! # Capacity
//!
//! A capacity of `0` means synchronous hand-off:
//!
//! ```text
//! Inbound, capacity 0:
//!   producer ──(value, handoff)──▶ loop
//!   producer ◀──────── handoff ─── loop takes the value
//!
//! Outbound, capacity 0:
//!   consumer ──────── ticket ────▶ loop (waits in reserve())
//!   consumer ◀─── value via ticket ─ loop
//! ```
//!
//! An outbound value therefore never leaves the loop until a consumer is
//! actually waiting for it, which is what lets a container keep accepting
//! deletes for an item it is currently offering. With a capacity above zero
//! both directions are plain bounded queues.
//!
//! A consumer that stops waiting after the loop already handed it a value
//! does not lose that value: it is kept on the port and returned by the next
//! request, ahead of anything the loop still holds.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::PortError;

/// Largest capacity a port can be configured with.
pub const MAX_CAPACITY: usize = usize::MAX >> 3;

/// Values handed to requests that were dropped before reading them.
type Stash<T> = Arc<std::sync::Mutex<VecDeque<T>>>;

fn lock<T>(stash: &std::sync::Mutex<VecDeque<T>>) -> MutexGuard<'_, VecDeque<T>> {
    stash.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Envelope<T> {
    value: T,
    handoff: Option<oneshot::Sender<()>>,
}

/// Create an inbound port with the given capacity.
///
/// # Panics
///
/// Panics if `capacity` exceeds [`MAX_CAPACITY`]; configuration types validate
/// this before reaching here.
pub fn inbound<T>(capacity: usize) -> (InboundTx<T>, InboundRx<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        InboundTx {
            tx,
            rendezvous: capacity == 0,
        },
        InboundRx { rx },
    )
}

/// Create an outbound port with the given capacity.
///
/// # Panics
///
/// Panics if `capacity` exceeds [`MAX_CAPACITY`].
pub fn outbound<T>(capacity: usize) -> (OutboundTx<T>, OutboundRx<T>) {
    if capacity == 0 {
        let (tickets_tx, tickets_rx) = mpsc::unbounded_channel();
        (
            OutboundTx {
                inner: OutboundTxInner::Rendezvous {
                    tickets: tickets_rx,
                },
            },
            OutboundRx {
                inner: OutboundRxInner::Rendezvous {
                    tickets: tickets_tx,
                    stash: Stash::default(),
                },
            },
        )
    } else {
        let (tx, rx) = mpsc::channel(capacity);
        (
            OutboundTx {
                inner: OutboundTxInner::Buffered { tx },
            },
            OutboundRx {
                inner: OutboundRxInner::Buffered {
                    rx: Arc::new(Mutex::new(rx)),
                },
            },
        )
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Producer side of an inbound port.
pub struct InboundTx<T> {
    tx: mpsc::Sender<Envelope<T>>,
    rendezvous: bool,
}

impl<T> Clone for InboundTx<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rendezvous: self.rendezvous,
        }
    }
}

impl<T> fmt::Debug for InboundTx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundTx")
            .field("rendezvous", &self.rendezvous)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<T> InboundTx<T> {
    /// Send a value into the owning loop.
    ///
    /// With capacity 0 this resolves once the loop has taken the value;
    /// otherwise once the value is queued.
    pub async fn send(&self, value: T) -> Result<(), PortError> {
        if !self.rendezvous {
            return self
                .tx
                .send(Envelope {
                    value,
                    handoff: None,
                })
                .await
                .map_err(|_| PortError::Closed);
        }

        let (handoff_tx, handoff_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                value,
                handoff: Some(handoff_tx),
            })
            .await
            .map_err(|_| PortError::Closed)?;

        // The loop signals the hand-off as soon as it dequeues the envelope.
        // If the loop stops with the envelope still queued the value is gone.
        handoff_rx.await.map_err(|_| PortError::Closed)
    }

    /// Whether the owning loop has stopped receiving.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Loop side of an inbound port.
pub struct InboundRx<T> {
    rx: mpsc::Receiver<Envelope<T>>,
}

impl<T> fmt::Debug for InboundRx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundRx").finish_non_exhaustive()
    }
}

impl<T> InboundRx<T> {
    /// Receive the next value.
    ///
    /// Returns `None` once every [`InboundTx`] has been dropped. Cancel safe.
    pub async fn recv(&mut self) -> Option<T> {
        let envelope = self.rx.recv().await?;
        if let Some(handoff) = envelope.handoff {
            // Producer may have given up waiting; the value is ours regardless.
            let _ = handoff.send(());
        }
        Some(envelope.value)
    }

    /// Stop accepting new values. Values already queued can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

// ============================================================================
// Outbound
// ============================================================================

enum OutboundTxInner<T> {
    Rendezvous {
        tickets: mpsc::UnboundedReceiver<oneshot::Sender<T>>,
    },
    Buffered {
        tx: mpsc::Sender<T>,
    },
}

/// Loop side of an outbound port.
///
/// Dropping it closes the port: waiting consumers observe `None`.
pub struct OutboundTx<T> {
    inner: OutboundTxInner<T>,
}

impl<T> fmt::Debug for OutboundTx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.inner {
            OutboundTxInner::Rendezvous { .. } => "rendezvous",
            OutboundTxInner::Buffered { .. } => "buffered",
        };
        f.debug_struct("OutboundTx").field("mode", &mode).finish()
    }
}

/// Permission to deliver exactly one value on an outbound port.
///
/// Obtained from [`OutboundTx::reserve`]. Sending can still fail on a
/// rendezvous port if the waiting consumer went away in the meantime; the
/// value is then handed back.
pub enum Slot<T> {
    /// A consumer is waiting on the other end of this ticket.
    Ticket(oneshot::Sender<T>),
    /// Buffer space reserved in a bounded queue.
    Permit(mpsc::OwnedPermit<T>),
}

impl<T> Slot<T> {
    /// Deliver `value`, or get it back if the consumer is gone.
    pub fn send(self, value: T) -> Result<(), T> {
        match self {
            Slot::Ticket(ticket) => ticket.send(value),
            Slot::Permit(permit) => {
                permit.send(value);
                Ok(())
            }
        }
    }
}

impl<T> OutboundTx<T> {
    /// Wait until a value can be delivered.
    ///
    /// Cancel safe: dropping the future loses nothing. Returns
    /// [`PortError::Closed`] once every consumer handle has been dropped.
    pub async fn reserve(&mut self) -> Result<Slot<T>, PortError> {
        match &mut self.inner {
            OutboundTxInner::Rendezvous { tickets } => loop {
                let ticket = tickets.recv().await.ok_or(PortError::Closed)?;
                if !ticket.is_closed() {
                    return Ok(Slot::Ticket(ticket));
                }
                // Stale ticket from a consumer that stopped waiting.
            },
            OutboundTxInner::Buffered { tx } => tx
                .clone()
                .reserve_owned()
                .await
                .map(Slot::Permit)
                .map_err(|_| PortError::Closed),
        }
    }

    /// Obtain a slot only if one is available right now.
    pub fn try_reserve(&mut self) -> Option<Slot<T>> {
        match &mut self.inner {
            OutboundTxInner::Rendezvous { tickets } => {
                while let Ok(ticket) = tickets.try_recv() {
                    if !ticket.is_closed() {
                        return Some(Slot::Ticket(ticket));
                    }
                }
                None
            }
            OutboundTxInner::Buffered { tx } => tx.clone().try_reserve_owned().ok().map(Slot::Permit),
        }
    }

    /// Deliver `value`, retrying if a waiting consumer disappears.
    ///
    /// Not cancel safe: the value is dropped if the future is. Loops that
    /// must keep the value across a `select!` should use [`reserve`](Self::reserve).
    pub async fn send(&mut self, mut value: T) -> Result<(), PortError> {
        loop {
            let slot = self.reserve().await?;
            match slot.send(value) {
                Ok(()) => return Ok(()),
                Err(returned) => value = returned,
            }
        }
    }
}

enum OutboundRxInner<T> {
    Rendezvous {
        tickets: mpsc::UnboundedSender<oneshot::Sender<T>>,
        stash: Stash<T>,
    },
    Buffered {
        rx: Arc<Mutex<mpsc::Receiver<T>>>,
    },
}

/// Consumer side of an outbound port. Cheap to clone.
pub struct OutboundRx<T> {
    inner: OutboundRxInner<T>,
}

impl<T> Clone for OutboundRx<T> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            OutboundRxInner::Rendezvous { tickets, stash } => OutboundRxInner::Rendezvous {
                tickets: tickets.clone(),
                stash: Arc::clone(stash),
            },
            OutboundRxInner::Buffered { rx } => OutboundRxInner::Buffered { rx: Arc::clone(rx) },
        };
        Self { inner }
    }
}

impl<T> fmt::Debug for OutboundRx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundRx").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> OutboundRx<T> {
    /// Wait for the next value.
    ///
    /// Returns `None` once the port is closed. Cancel safe: a value handed
    /// over to a dropped `recv` is returned by the next one.
    pub async fn recv(&self) -> Option<T> {
        self.request().await
    }

    /// Register interest in the next value.
    ///
    /// The returned [`Request`] can be polled by `&mut` reference across many
    /// `select!` iterations without losing a value.
    pub fn request(&self) -> Request<T> {
        match &self.inner {
            OutboundRxInner::Rendezvous { tickets, stash } => {
                if let Some(value) = lock(stash).pop_front() {
                    return Request {
                        inner: RequestInner::Ready(Some(value)),
                    };
                }
                let (tx, rx) = oneshot::channel();
                if tickets.send(tx).is_err() {
                    return Request {
                        inner: RequestInner::Ready(None),
                    };
                }
                Request {
                    inner: RequestInner::Ticket {
                        rx,
                        stash: Arc::clone(stash),
                    },
                }
            }
            OutboundRxInner::Buffered { rx } => {
                let rx = Arc::clone(rx);
                Request {
                    inner: RequestInner::Buffered(Box::pin(async move {
                        rx.lock().await.recv().await
                    })),
                }
            }
        }
    }
}

type BoxedRecv<T> = Pin<Box<dyn Future<Output = Option<T>> + Send>>;

enum RequestInner<T> {
    Ticket {
        rx: oneshot::Receiver<T>,
        stash: Stash<T>,
    },
    Buffered(BoxedRecv<T>),
    Ready(Option<T>),
}

/// A pending request for the next value of an outbound port.
///
/// Resolves to `None` when the port is closed. Dropping an unresolved
/// request keeps any value the loop already handed to it on the port.
pub struct Request<T> {
    inner: RequestInner<T>,
}

// Never pinned structurally: the value is only moved out through `get_mut`.
impl<T> Unpin for Request<T> {}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request").finish_non_exhaustive()
    }
}

impl<T> Future for Request<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let polled = match &mut this.inner {
            RequestInner::Ticket { rx, .. } => Pin::new(rx).poll(cx).map(Result::ok),
            RequestInner::Buffered(fut) => return fut.as_mut().poll(cx),
            RequestInner::Ready(value) => return Poll::Ready(value.take()),
        };
        if polled.is_ready() {
            this.inner = RequestInner::Ready(None);
        }
        polled
    }
}

impl<T> Drop for Request<T> {
    fn drop(&mut self) {
        if let RequestInner::Ticket { rx, stash } = &mut self.inner {
            // After close() the loop can no longer deliver, so try_recv sees
            // every value that did get through.
            rx.close();
            if let Ok(value) = rx.try_recv() {
                lock(stash).push_back(value);
            }
        }
    }
}
