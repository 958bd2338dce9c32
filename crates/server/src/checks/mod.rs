//! Health checks: execution, probe protocols and the check catalog.
//!
//! ## Submodules
//!
//! - `runner` - wraps any probe into a [`CheckResult`]
//! - `roundtrip` - send-then-poll and connectivity probes
//! - `catalog` - the login/outbound/inbound/forwarding checks

pub mod catalog;
pub mod roundtrip;
pub mod runner;

pub use catalog::{CheckKind, CheckSuite, HealthChecks};
pub use roundtrip::{PollSettings, Roundtrip, check_connectivity, poll_for_subject};
pub use runner::{CheckResult, ProbeContext, run_check};
