//! Read-visibility checker
//!
//! Checks a scenario history against the visibility rules a replicated
//! store must obey, independently of the literal counts a scenario expects:
//!
//! 1. A read never returns more documents than were submitted by inserts
//!    invoked before the read completed. Failed inserts count here, since a
//!    write that missed its concern may still be applied.
//! 2. A majority read never returns fewer documents than were acknowledged
//!    at `w: majority` before the read was invoked.
//! 3. Majority reads that follow one another never go backwards.

use crate::history::{History, OpResult, Operation};

/// Result of a visibility check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub is_consistent: bool,
    /// One line per violated rule instance
    pub violations: Vec<String>,
}

impl CheckResult {
    fn from_violations(violations: Vec<String>) -> Self {
        CheckResult {
            is_consistent: violations.is_empty(),
            violations,
        }
    }
}

pub struct VisibilityChecker;

impl VisibilityChecker {
    pub fn check(history: &History) -> CheckResult {
        let ops = history.sorted_by_invoke_time();
        let inserts: Vec<&Operation> = ops.iter().copied().filter(|op| op.is_insert()).collect();
        let mut violations = Vec::new();

        for read in ops.iter().copied() {
            let Some(observed) = read.read_count() else {
                continue;
            };

            let upper: usize = inserts
                .iter()
                .filter(|w| w.invoke_ts <= read.complete_ts)
                .map(|w| w.submitted_docs())
                .sum();
            if observed > upper {
                violations.push(format!(
                    "read {} returned {} documents but only {} were written",
                    read.id, observed, upper
                ));
            }

            if read.is_majority_read() {
                let lower: usize = inserts
                    .iter()
                    .filter(|w| w.is_majority_acknowledged() && w.precedes(read))
                    .map(|w| w.submitted_docs())
                    .sum();
                if observed < lower {
                    violations.push(format!(
                        "majority read {} returned {} documents, missing majority-acknowledged writes ({})",
                        read.id, observed, lower
                    ));
                }
            }
        }

        let majority_reads: Vec<&Operation> = ops
            .iter()
            .copied()
            .filter(|op| op.is_majority_read() && !matches!(op.result, OpResult::Error(_)))
            .collect();
        for (i, later) in majority_reads.iter().enumerate() {
            for earlier in &majority_reads[..i] {
                if !earlier.precedes(later) {
                    continue;
                }
                if let (Some(before), Some(after)) = (earlier.read_count(), later.read_count()) {
                    if after < before {
                        violations.push(format!(
                            "majority read {} returned {} documents after read {} returned {}",
                            later.id, after, earlier.id, before
                        ));
                    }
                }
            }
        }

        CheckResult::from_violations(violations)
    }
}
