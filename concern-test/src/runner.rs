//! Scenario runner
//!
//! Executes a scenario's steps one after another on the calling task. The
//! whole scenario is bounded by its deadline, and every insert is handed the
//! time that remains, so a write blocked on quorum surfaces as `TimedOut`
//! at the step that blocked. Nothing is retried.

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use replset_harness::{FaultOutcome, ReadConcernLevel, StoreError};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::checker::{CheckResult, VisibilityChecker};
use crate::client::RecordingHandle;
use crate::fixture::ScenarioFixture;
use crate::history::History;
use crate::scenario::{Expectation, Scenario, Step};

/// How a scenario run ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScenarioOutcome {
    /// Every step completed and every count matched
    Passed,
    /// A read returned a different count than expected
    CountMismatch {
        step: usize,
        read: Option<ReadConcernLevel>,
        expected: usize,
        observed: usize,
    },
    /// The store rejected an operation
    StoreFailed { step: usize, error: String },
    /// A step could not be executed, e.g. it names an unknown member
    InvalidStep { step: usize, error: String },
    /// The scenario deadline expired while `step` was running
    TimedOut { step: usize, elapsed: Duration },
    /// Counts matched but the history breaks a visibility rule
    Inconsistent { violations: Vec<String> },
    /// The fixture could not prepare the environment
    SetupFailed(String),
}

impl ScenarioOutcome {
    /// Index of the step the run stopped at, if it stopped early
    pub fn step(&self) -> Option<usize> {
        match self {
            ScenarioOutcome::CountMismatch { step, .. }
            | ScenarioOutcome::StoreFailed { step, .. }
            | ScenarioOutcome::InvalidStep { step, .. }
            | ScenarioOutcome::TimedOut { step, .. } => Some(*step),
            ScenarioOutcome::Passed
            | ScenarioOutcome::Inconsistent { .. }
            | ScenarioOutcome::SetupFailed(_) => None,
        }
    }
}

impl fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioOutcome::Passed => write!(f, "passed"),
            ScenarioOutcome::CountMismatch {
                step,
                read,
                expected,
                observed,
            } => {
                let read = read.map(|r| r.to_string()).unwrap_or_else(|| "default".to_string());
                write!(
                    f,
                    "step {}: expected {} documents at read:{}, observed {}",
                    step, expected, read, observed
                )
            }
            ScenarioOutcome::StoreFailed { step, error } => write!(f, "step {}: {}", step, error),
            ScenarioOutcome::InvalidStep { step, error } => {
                write!(f, "step {}: invalid step: {}", step, error)
            }
            ScenarioOutcome::TimedOut { step, elapsed } => {
                write!(f, "step {}: timed out after {:?}", step, elapsed)
            }
            ScenarioOutcome::Inconsistent { violations } => {
                write!(f, "inconsistent: {}", violations.join("; "))
            }
            ScenarioOutcome::SetupFailed(reason) => write!(f, "setup failed: {}", reason),
        }
    }
}

/// A fault injection action taken by a scenario
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaultRecord {
    /// Index of the isolate/heal step
    pub step: usize,
    pub member: String,
    /// `true` for a heal, `false` for an isolation
    pub reachable: bool,
    pub outcome: FaultOutcome,
}

/// Result of running one scenario
#[derive(Debug)]
pub struct ScenarioReport {
    pub name: String,
    pub expectation: Expectation,
    pub outcome: ScenarioOutcome,
    pub elapsed: Duration,
    pub history: History,
    pub check: CheckResult,
    pub faults: Vec<FaultRecord>,
    /// The step that was running when the scenario stopped early
    pub stopped_at: Option<Step>,
}

impl ScenarioReport {
    pub(crate) fn setup_failed(scenario: &Scenario, reason: String) -> Self {
        let history = History::new();
        let check = VisibilityChecker::check(&history);
        ScenarioReport {
            name: scenario.name.clone(),
            expectation: scenario.expectation,
            outcome: ScenarioOutcome::SetupFailed(reason),
            elapsed: Duration::ZERO,
            history,
            check,
            faults: Vec::new(),
            stopped_at: None,
        }
    }

    /// Every step completed, every count matched and the history is consistent
    pub fn passed(&self) -> bool {
        self.outcome == ScenarioOutcome::Passed
    }

    /// The deadline expired, at whatever step
    pub fn timed_out(&self) -> bool {
        matches!(self.outcome, ScenarioOutcome::TimedOut { .. })
    }

    /// The deadline expired while an insert was waiting for its write concern
    pub fn write_timed_out(&self) -> bool {
        self.timed_out() && matches!(self.stopped_at, Some(Step::Insert { .. }))
    }

    /// Whether the run ended the way the scenario says it should
    pub fn met_expectation(&self) -> bool {
        match self.expectation {
            Expectation::Pass => self.passed(),
            Expectation::TimeOut => self.write_timed_out(),
        }
    }

    /// Fault actions that did not take effect
    pub fn failed_faults(&self) -> impl Iterator<Item = &FaultRecord> {
        self.faults.iter().filter(|f| !f.outcome.is_effective())
    }

    /// Serializable digest for JSON output
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            name: self.name.clone(),
            outcome: self.outcome.to_string(),
            met_expectation: self.met_expectation(),
            elapsed_ms: self.elapsed.as_millis() as u64,
            operations: self.history.len(),
            violations: self.check.violations.clone(),
        }
    }
}

/// Serializable digest of a report
#[derive(Clone, Debug, Serialize)]
pub struct ReportSummary {
    pub name: String,
    pub outcome: String,
    pub met_expectation: bool,
    pub elapsed_ms: u64,
    pub operations: usize,
    pub violations: Vec<String>,
}

/// Run the steps of `scenario` against a fixture that is already `Ready`
pub async fn run_scenario(fixture: &mut ScenarioFixture, scenario: &Scenario) -> ScenarioReport {
    let start = Instant::now();
    let deadline_at = start + scenario.deadline;
    let history = Arc::new(Mutex::new(History::new()));
    let recorder = RecordingHandle::new(
        fixture.handle().clone(),
        history.clone(),
        Arc::new(AtomicU64::new(1)),
    );
    let mut faults = Vec::new();
    let mut current = 0usize;

    info!(scenario = %scenario.name, steps = scenario.steps.len(), "running scenario");

    let body = execute_steps(
        fixture,
        scenario,
        &recorder,
        start,
        deadline_at,
        &mut current,
        &mut faults,
    );
    let result = tokio::time::timeout_at(deadline_at, body).await;

    let mut outcome = match result {
        Ok(Ok(())) => ScenarioOutcome::Passed,
        Ok(Err(outcome)) => outcome,
        Err(_) => ScenarioOutcome::TimedOut {
            step: current,
            elapsed: start.elapsed(),
        },
    };

    let history = history.lock().clone();
    let check = VisibilityChecker::check(&history);
    if outcome == ScenarioOutcome::Passed && !check.is_consistent {
        outcome = ScenarioOutcome::Inconsistent {
            violations: check.violations.clone(),
        };
    }

    let stopped_at = outcome.step().and_then(|i| scenario.steps.get(i)).cloned();
    let report = ScenarioReport {
        name: scenario.name.clone(),
        expectation: scenario.expectation,
        outcome,
        elapsed: start.elapsed(),
        history,
        check,
        faults,
        stopped_at,
    };

    if report.met_expectation() {
        info!(scenario = %report.name, outcome = %report.outcome, "scenario finished");
    } else {
        warn!(scenario = %report.name, outcome = %report.outcome, "scenario did not meet expectation");
    }
    report
}

#[allow(clippy::too_many_arguments)]
async fn execute_steps(
    fixture: &mut ScenarioFixture,
    scenario: &Scenario,
    recorder: &RecordingHandle,
    start: Instant,
    deadline_at: Instant,
    current: &mut usize,
    faults: &mut Vec<FaultRecord>,
) -> Result<(), ScenarioOutcome> {
    for (idx, step) in scenario.steps.iter().enumerate() {
        *current = idx;
        debug!(scenario = %scenario.name, step = idx, %step, "step");

        match step {
            Step::Isolate(member) | Step::Heal(member) => {
                let reachable = matches!(step, Step::Heal(_));
                let outcome = fixture
                    .set_reachability(member, reachable)
                    .await
                    .map_err(|e| ScenarioOutcome::InvalidStep {
                        step: idx,
                        error: e.to_string(),
                    })?;
                faults.push(FaultRecord {
                    step: idx,
                    member: member.clone(),
                    reachable,
                    outcome,
                });
            }
            Step::Insert { docs, write } => {
                let remaining = deadline_at.saturating_duration_since(Instant::now());
                recorder
                    .with_concern(*write, None)
                    .insert_many(docs, remaining)
                    .await
                    .map_err(|e| match e {
                        StoreError::DeadlineElapsed { .. } => ScenarioOutcome::TimedOut {
                            step: idx,
                            elapsed: start.elapsed(),
                        },
                        other => ScenarioOutcome::StoreFailed {
                            step: idx,
                            error: other.to_string(),
                        },
                    })?;
            }
            Step::ExpectCount { read, expected } => {
                let observed = recorder
                    .with_concern(None, *read)
                    .count()
                    .await
                    .map_err(|e| ScenarioOutcome::StoreFailed {
                        step: idx,
                        error: e.to_string(),
                    })?;
                if observed != *expected {
                    return Err(ScenarioOutcome::CountMismatch {
                        step: idx,
                        read: *read,
                        expected: *expected,
                        observed,
                    });
                }
            }
            Step::Sleep(duration) => tokio::time::sleep(*duration).await,
        }
    }
    Ok(())
}

/// Run scenarios one at a time on the same fixture.
///
/// They share one cluster network, so they never run concurrently.
pub async fn run_all(fixture: &mut ScenarioFixture, scenarios: &[Scenario]) -> Vec<ScenarioReport> {
    let mut reports = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        reports.push(fixture.run(scenario).await);
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        let outcome = ScenarioOutcome::CountMismatch {
            step: 3,
            read: Some(ReadConcernLevel::Majority),
            expected: 2,
            observed: 3,
        };
        assert_eq!(
            outcome.to_string(),
            "step 3: expected 2 documents at read:majority, observed 3"
        );
        assert_eq!(
            ScenarioOutcome::TimedOut {
                step: 2,
                elapsed: Duration::from_secs(5)
            }
            .to_string(),
            "step 2: timed out after 5s"
        );
        assert_eq!(ScenarioOutcome::Passed.step(), None);
    }

    fn timed_out_report(stopped_at: Step) -> ScenarioReport {
        let history = History::new();
        let check = VisibilityChecker::check(&history);
        ScenarioReport {
            name: "blocked".to_string(),
            expectation: Expectation::TimeOut,
            outcome: ScenarioOutcome::TimedOut {
                step: 0,
                elapsed: Duration::from_secs(5),
            },
            elapsed: Duration::from_secs(5),
            history,
            check,
            faults: Vec::new(),
            stopped_at: Some(stopped_at),
        }
    }

    #[test]
    fn test_timeout_expectation_requires_a_blocked_insert() {
        let insert = timed_out_report(Step::Insert {
            docs: Vec::new(),
            write: Some(replset_harness::WriteConcernLevel::Majority),
        });
        assert!(insert.met_expectation());

        let sleep = timed_out_report(Step::Sleep(Duration::from_secs(10)));
        assert!(sleep.timed_out());
        assert!(!sleep.met_expectation());

        let read = timed_out_report(Step::ExpectCount {
            read: None,
            expected: 3,
        });
        assert!(!read.met_expectation());
    }
}
