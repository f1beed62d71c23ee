//! Producer Agent
//!
//! Samples runtime statistics on one cadence and reports them on another.
//!
//! # Architecture
//!
//! - [`SnapshotStore`]: single-writer table of current metric values, read by
//!   copying out
//! - [`Sampler`]: source of metric readings; [`RuntimeSampler`] reads process
//!   and host statistics
//! - [`Scheduler`]: one task selecting between the poll timer, the report
//!   timer, and cancellation; reports go to a
//!   [`DeliveryClient`](crate::delivery::DeliveryClient)

mod sampler;
mod scheduler;
mod snapshot;

pub use sampler::{RuntimeSampler, Sampler, StaticSampler};
pub use scheduler::{DEFAULT_STOP_DEADLINE, Scheduler, SchedulerError, SchedulerHandle};
pub use snapshot::SnapshotStore;
