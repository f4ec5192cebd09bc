//! # Sluice
//!
//! Message-passing building blocks for in-process pipelines.
//!
//! Every component owns its state inside a single tokio task (its control
//! loop) and talks to the rest of the program only through [ports](port).
//! There are no locks around the data itself; ordering and exclusivity come
//! from the loop processing one event at a time.
//!
//! ## Components
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  DeliveryTracker                                            │
//! │  forward once, keep a pending ack until ack or deadline     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  OrderedKeyedContainer                                      │
//! │  FIFO queue with delete-by-key, driven through ports        │
//! ├──────────────────────────┬──────────────────────────────────┤
//! │  stage                   │  support                         │
//! │  • Buffer                │  • SerialNumbers framing         │
//! │  • Mux                   │  • Metrics counters              │
//! │  • Skip                  │  • wait_for_signal               │
//! ├──────────────────────────┴──────────────────────────────────┤
//! │  port: inbound / outbound, capacity 0 = rendezvous          │
//! │  keyed / deadline: Keyed, KeyedItem, Deadline, DeadlineItem │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use sluice::{DeadlineItem, DeliveryTracker};
//!
//! let tracker = DeliveryTracker::new()?;
//! tracker.send(DeadlineItem::new(1u64, "payload", Duration::from_secs(5))).await?;
//!
//! let item = tracker.next().await?;
//! // ... process the item ...
//! tracker.ack(*item.key()).await?;
//! ```
//!
//! ## Logging
//!
//! All components emit `tracing` events; install a subscriber in the
//! application to see them. Drops (duplicates, expired items, skipped values)
//! are never errors and only show up at `debug`/`trace` level and in counters.

#![deny(missing_docs)]

pub mod config;
pub mod container;
pub mod deadline;
pub mod error;
pub mod keyed;
pub mod metrics;
pub mod port;
pub mod prelude;
pub mod serial;
pub mod shutdown;
pub mod stage;
pub mod tracker;

pub use config::{ContainerConfig, TrackerConfig};
pub use container::OrderedKeyedContainer;
pub use deadline::{Deadline, DeadlineItem, DeadlineState};
pub use error::{
    ConfigError, ContainerError, MetricsError, PortError, SerialError, StageError, TrackerError,
};
pub use keyed::{Keyed, KeyedItem};
pub use metrics::{MetricOp, MetricUpdate, Metrics};
pub use port::{InboundRx, InboundTx, OutboundRx, OutboundTx, Request, Slot};
pub use serial::SerialNumbers;
pub use shutdown::wait_for_signal;
pub use stage::{Buffer, Mux, Skip, Stage};
pub use tracker::{DeliveryTracker, PendingAck, TrackerStats};
