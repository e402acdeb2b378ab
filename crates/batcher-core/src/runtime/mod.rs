//! Batch execution runtime.
//!
//! A single [`scheduler::Scheduler`] claims pending tasks from the
//! [store](crate::store) and drives their combinations through an
//! [`engine::ExecutionEngine`], one submission at a time under the
//! [`admission::AdmissionGate`].

pub mod admission;
pub mod engine;
pub mod scheduler;
