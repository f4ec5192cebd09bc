//! Configuration for containers and trackers.
//!
//! The configuration surface is small: one capacity per port plus the
//! default deadline applied by [`DeliveryTracker::track`](crate::DeliveryTracker::track).
//! The tracker's internal container is not configurable; its ports stay
//! rendezvous.
//! Both types deserialize with defaults for missing fields, so they can be
//! embedded in an application's own config file.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use sluice::{ContainerConfig, TrackerConfig};
//!
//! let config = TrackerConfig::default()
//!     .with_obj_in_capacity(16)
//!     .with_default_deadline(Duration::from_secs(2));
//! config.validate()?;
//!
//! let container = ContainerConfig::default().with_output_capacity(4);
//! container.validate()?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::port::MAX_CAPACITY;

pub(crate) fn check_capacity(port: &'static str, capacity: usize) -> Result<(), ConfigError> {
    if capacity > MAX_CAPACITY {
        return Err(ConfigError::CapacityTooLarge {
            port,
            capacity,
            max: MAX_CAPACITY,
        });
    }
    Ok(())
}

/// Port capacities for an [`OrderedKeyedContainer`](crate::OrderedKeyedContainer).
///
/// Every capacity defaults to 0: callers hand values directly to the control
/// loop and the output only releases an item to a consumer that is waiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Capacity of the add port.
    pub add_capacity: usize,
    /// Capacity of the delete port.
    pub delete_capacity: usize,
    /// Capacity of the output port.
    ///
    /// Items buffered in the output port have left the container and can no
    /// longer be deleted.
    pub output_capacity: usize,
}

impl ContainerConfig {
    /// Set the add port capacity.
    pub fn with_add_capacity(mut self, capacity: usize) -> Self {
        self.add_capacity = capacity;
        self
    }

    /// Set the delete port capacity.
    pub fn with_delete_capacity(mut self, capacity: usize) -> Self {
        self.delete_capacity = capacity;
        self
    }

    /// Set the output port capacity.
    pub fn with_output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    /// Check that every capacity can be allocated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_capacity("add", self.add_capacity)?;
        check_capacity("delete", self.delete_capacity)?;
        check_capacity("output", self.output_capacity)
    }
}

/// Configuration for a [`DeliveryTracker`](crate::DeliveryTracker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Capacity of the `ObjIn` port.
    pub obj_in_capacity: usize,
    /// Capacity of the `ObjOut` port.
    ///
    /// With a non-zero capacity an item counts as forwarded once it is
    /// buffered, even if the consumer reads it after its deadline.
    pub obj_out_capacity: usize,
    /// Capacity of the `AckIn` port.
    pub ack_in_capacity: usize,
    /// Deadline given to items created through `track`.
    pub default_deadline: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            obj_in_capacity: 0,
            obj_out_capacity: 0,
            ack_in_capacity: 0,
            default_deadline: Duration::from_secs(30),
        }
    }
}

impl TrackerConfig {
    /// Set the `ObjIn` capacity.
    pub fn with_obj_in_capacity(mut self, capacity: usize) -> Self {
        self.obj_in_capacity = capacity;
        self
    }

    /// Set the `ObjOut` capacity.
    pub fn with_obj_out_capacity(mut self, capacity: usize) -> Self {
        self.obj_out_capacity = capacity;
        self
    }

    /// Set the `AckIn` capacity.
    pub fn with_ack_in_capacity(mut self, capacity: usize) -> Self {
        self.ack_in_capacity = capacity;
        self
    }

    /// Set the default deadline for `track`.
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Check capacities and the default deadline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_capacity("obj_in", self.obj_in_capacity)?;
        check_capacity("obj_out", self.obj_out_capacity)?;
        check_capacity("ack_in", self.ack_in_capacity)?;
        if self.default_deadline.is_zero() {
            return Err(ConfigError::ZeroDeadline);
        }
        Ok(())
    }
}
