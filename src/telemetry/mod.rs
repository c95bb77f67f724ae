//! Admission telemetry.
//!
//! The admission flow reports what happened to each request as an
//! [`AdmissionEvent`]. Events flow through `TelemetrySink` implementations,
//! which are plain `tower::Service<AdmissionEvent>`s, so they can log,
//! collect, or forward events (see the `ticketgate-jsonl` crate).
//!
//! Emission is best effort: a failing or slow sink never fails or delays an
//! admission.

pub mod events;
pub mod sinks;

pub use events::AdmissionEvent;
pub use sinks::{emit_best_effort, LogSink, MemorySink, NonBlockingSink, NullSink, TelemetrySink};
