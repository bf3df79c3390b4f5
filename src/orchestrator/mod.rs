//! Application-level orchestration.
//!
//! This module owns the run lifecycle (submit, poll, settle, stop), the poll
//! timer and the classification of poll results. UI/CLI layers either drive a
//! [`RunController`] directly or talk to [`run_controller`] over channels.

mod aggregator;
mod controller;
mod driver;
mod scheduler;

pub(crate) use controller::RunController;
pub(crate) use driver::{check_backend, run_controller, UiCommand};
