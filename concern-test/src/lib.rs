//! Read/write concern testing for replica sets
//!
//! Drives fixed scenarios against a replica set: isolate members, write at a
//! write concern, read at a read concern, and compare the observed counts
//! with literal expectations. Every operation is recorded to a history that
//! is checked for reads observing writes they should not see.

pub mod checker;
pub mod client;
pub mod fixture;
pub mod history;
pub mod runner;
pub mod scenario;
pub mod trace;

pub use checker::{CheckResult, VisibilityChecker};
pub use client::RecordingHandle;
pub use fixture::{Connector, FixturePhase, LiveConnector, ScenarioFixture};
pub use history::{History, OpKind, OpResult, Operation, Timestamp};
pub use runner::{run_all, run_scenario, ScenarioOutcome, ScenarioReport};
pub use scenario::{all_scenarios, find_scenario, Expectation, Scenario, Step};
