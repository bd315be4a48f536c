//! Job layer: everything around one deck build.
//!
//! The [`orchestrator`] sequences the pipeline stages and owns the job
//! lifecycle. [`status`] tracks in-flight jobs and answers status queries,
//! [`events`] streams stage transitions to listeners, [`worker`] runs the
//! CPU-bound stages on the blocking pool, and [`cleanup`] throws away the
//! batch intermediates once the deck is saved.

pub mod cleanup;
pub mod events;
pub mod orchestrator;
pub mod status;
pub mod worker;
