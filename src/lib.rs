//! hireflow — phase-transition workflow engine for a multi-stage recruitment
//! pipeline.
//!
//! For every (candidate, job-posting) pairing the crate tracks progress
//! through ordered phases (entry, document screening, selection rounds,
//! offer-hold, offer-accept, decline). Each accepted transition appends a
//! [`models::Task`] to the pipeline instance's history and orchestrates the
//! side effects that ride along: scheduling-ledger bookkeeping, evaluation
//! records, sales-forecast flips, and outbound candidate/operator
//! notifications.
//!
//! This is a library: persistence sits behind [`store::EntityStore`] (a
//! SQLite implementation ships in [`store::sqlite`]), delivery behind
//! [`notify::NotificationSink`], and the transport layer is owned by the
//! embedding application.

pub mod config;
pub mod engine;
pub mod errors;
pub mod flow;
pub mod identity;
pub mod models;
pub mod notify;
pub mod phase;
pub mod store;

pub use engine::{BatchRunner, TransitionEngine};
pub use errors::{EngineError, NotifyError};
pub use models::{AdvanceOptions, AdvanceRequest, OperatorRole, TaskOption};
pub use phase::{Phase, PhaseFamily, PhaseState, Subphase};
