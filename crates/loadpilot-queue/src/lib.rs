//! loadpilot-queue — request intake and dispatch.
//!
//! Producers submit [`WorkloadRequest`](loadpilot_state::WorkloadRequest)s
//! into a bounded [`RequestQueue`]. The [`RequestProcessor`] loop pulls
//! them, asks the load balancer for a component, runs the unit of work
//! outside every lock, and records the outcome into the metrics store,
//! the balancer's algorithm counters, and a bounded completion history.
//!
//! Under saturation the processor sheds queued work below normal
//! priority so that critical requests keep moving.

pub mod processor;
pub mod queue;

pub use processor::{
    ProcessorSettings, RequestProcessor, SubmitOutcome, WorkFn, WorkFuture, simulated_work,
};
pub use queue::RequestQueue;
