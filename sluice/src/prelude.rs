//! Common imports for building pipelines.
//!
//! ```rust,ignore
//! use sluice::prelude::*;
//! ```

pub use crate::config::{ContainerConfig, TrackerConfig};
pub use crate::container::OrderedKeyedContainer;
pub use crate::deadline::{Deadline, DeadlineItem};
pub use crate::error::{ContainerError, StageError, TrackerError};
pub use crate::keyed::{Keyed, KeyedItem};
pub use crate::stage::{Buffer, Mux, Skip, Stage};
pub use crate::tracker::DeliveryTracker;
