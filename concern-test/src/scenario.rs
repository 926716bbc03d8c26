//! Concern scenarios
//!
//! A scenario is a fixed, linear script: isolate members, insert at a write
//! concern, read at a read concern and compare the count with a literal
//! expectation, optionally sleep and compare again. Counts are exact at
//! every step, not "eventually equal".

use std::fmt;
use std::time::Duration;

use replset_harness::cluster::config::TimingConfig;
use replset_harness::{sample_people, Person, ReadConcernLevel, WriteConcernLevel};

/// One step of a scenario
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Disconnect a member from the cluster network
    Isolate(String),
    /// Reconnect a member
    Heal(String),
    /// Insert documents; `None` uses the store's default write concern
    Insert {
        docs: Vec<Person>,
        write: Option<WriteConcernLevel>,
    },
    /// Read the whole collection and compare the document count
    ExpectCount {
        read: Option<ReadConcernLevel>,
        expected: usize,
    },
    /// Let asynchronous replication make progress
    Sleep(Duration),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Isolate(name) => write!(f, "isolate {}", name),
            Step::Heal(name) => write!(f, "heal {}", name),
            Step::Insert { docs, write } => match write {
                Some(w) => write!(f, "insert {} docs w:{}", docs.len(), w),
                None => write!(f, "insert {} docs", docs.len()),
            },
            Step::ExpectCount { read, expected } => match read {
                Some(r) => write!(f, "expect {} docs at read:{}", expected, r),
                None => write!(f, "expect {} docs", expected),
            },
            Step::Sleep(d) => write!(f, "sleep {:?}", d),
        }
    }
}

/// How a scenario is expected to end
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expectation {
    /// Every step completes and every count matches
    Pass,
    /// A write blocks on quorum until the scenario deadline expires
    TimeOut,
}

/// A named, linear script of steps
#[derive(Clone, Debug, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub steps: Vec<Step>,
    /// Bound on the whole scenario, blocked writes included
    pub deadline: Duration,
    pub expectation: Expectation,
}

impl Scenario {
    /// Create an empty scenario with the default 5s deadline, expected to pass
    pub fn new(name: &str, description: &str) -> Self {
        Scenario {
            name: name.to_string(),
            description: description.to_string(),
            steps: Vec::new(),
            deadline: Duration::from_secs(5),
            expectation: Expectation::Pass,
        }
    }

    /// Append a step that disconnects `member`
    pub fn isolate(mut self, member: &str) -> Self {
        self.steps.push(Step::Isolate(member.to_string()));
        self
    }

    /// Append a step that reconnects `member`
    pub fn heal(mut self, member: &str) -> Self {
        self.steps.push(Step::Heal(member.to_string()));
        self
    }

    /// Append an insert of `docs` at `write`
    pub fn insert(mut self, docs: &[Person], write: Option<WriteConcernLevel>) -> Self {
        self.steps.push(Step::Insert {
            docs: docs.to_vec(),
            write,
        });
        self
    }

    /// Append a read at `read` that must return exactly `expected` documents
    pub fn expect_count(mut self, read: Option<ReadConcernLevel>, expected: usize) -> Self {
        self.steps.push(Step::ExpectCount { read, expected });
        self
    }

    /// Expect `local` and `majority` counts back to back
    pub fn expect_local_and_majority(self, local: usize, majority: usize) -> Self {
        self.expect_count(Some(ReadConcernLevel::Local), local)
            .expect_count(Some(ReadConcernLevel::Majority), majority)
    }

    /// Append a pause of `duration`
    pub fn sleep(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Sleep(duration));
        self
    }

    /// Bound the whole scenario by `deadline`
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set how the scenario is expected to end
    pub fn expecting(mut self, expectation: Expectation) -> Self {
        self.expectation = expectation;
        self
    }

    /// Members this scenario isolates at some point
    pub fn isolated_members(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                Step::Isolate(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Three documents at the default write concern on a healthy cluster
pub fn normal_insert(timing: &TimingConfig) -> Scenario {
    Scenario::new(
        "normal_insert",
        "insert 3 documents with every member connected; an unscoped read sees all 3",
    )
    .insert(&sample_people(), None)
    .expect_count(None, 3)
    .with_deadline(Duration::from_millis(timing.scenario_deadline_ms))
}

/// With w:1 a write returns once the primary has it, whatever the partition
pub fn single_node_write_with_minority_isolated(timing: &TimingConfig) -> Scenario {
    Scenario::new(
        "single_node_write_with_minority_isolated",
        "isolate mongo3 and mongo4; a w:1 insert does not wait for them",
    )
    .isolate("mongo3")
    .isolate("mongo4")
    .insert(&sample_people(), Some(WriteConcernLevel::single_node()))
    .expect_count(None, 3)
    .with_deadline(Duration::from_millis(timing.scenario_deadline_ms))
}

/// Three data-bearing members remain, exactly the majority of five
pub fn majority_write_with_quorum(timing: &TimingConfig) -> Scenario {
    Scenario::new(
        "majority_write_with_quorum",
        "isolate mongo4 and the arbiter; three data-bearing members still acknowledge a majority write",
    )
    .isolate("mongo4")
    .isolate("mongo-arbiter")
    .insert(&sample_people(), Some(WriteConcernLevel::Majority))
    .expect_count(None, 3)
    .with_deadline(Duration::from_millis(timing.scenario_deadline_ms))
}

/// Three voting members remain but one is the arbiter, so only two can
/// acknowledge: the write blocks until the deadline
pub fn majority_write_without_quorum(timing: &TimingConfig) -> Scenario {
    Scenario::new(
        "majority_write_without_quorum",
        "isolate mongo3 and mongo4; a majority insert blocks until the deadline",
    )
    .isolate("mongo3")
    .isolate("mongo4")
    .insert(&sample_people(), Some(WriteConcernLevel::Majority))
    .expect_count(None, 3)
    .with_deadline(Duration::from_millis(timing.scenario_deadline_ms))
    .expecting(Expectation::TimeOut)
}

/// Local reads see w:1 writes at once, majority reads only once replicated,
/// and never while the write cannot reach a majority
pub fn read_majority_after_w1(timing: &TimingConfig) -> Scenario {
    let people = sample_people();
    let grace = Duration::from_millis(timing.grace_interval_ms);
    let w1 = Some(WriteConcernLevel::single_node());

    Scenario::new(
        "read_majority_after_w1",
        "w:1 writes are visible to local reads immediately and to majority reads only once a majority has them",
    )
    .insert(&people[..2], w1)
    .expect_local_and_majority(2, 0)
    .sleep(grace)
    .expect_local_and_majority(2, 2)
    .isolate("mongo3")
    .isolate("mongo4")
    .insert(&people[2..], w1)
    .expect_local_and_majority(3, 2)
    .sleep(grace)
    .expect_local_and_majority(3, 2)
    .with_deadline(grace * 2 + Duration::from_millis(timing.scenario_deadline_ms))
}

/// Every built-in scenario
pub fn all_scenarios(timing: &TimingConfig) -> Vec<Scenario> {
    vec![
        normal_insert(timing),
        single_node_write_with_minority_isolated(timing),
        majority_write_with_quorum(timing),
        majority_write_without_quorum(timing),
        read_majority_after_w1(timing),
    ]
}

/// Look up a built-in scenario by name
pub fn find_scenario(timing: &TimingConfig, name: &str) -> Option<Scenario> {
    all_scenarios(timing).into_iter().find(|s| s.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_are_unique() {
        let scenarios = all_scenarios(&TimingConfig::default());
        let mut names: Vec<_> = scenarios.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), scenarios.len());
    }

    #[test]
    fn test_read_scenario_shape() {
        let scenario = read_majority_after_w1(&TimingConfig::default());
        assert_eq!(scenario.isolated_members(), vec!["mongo3", "mongo4"]);
        assert_eq!(scenario.deadline, Duration::from_secs(11));

        let sleeps: Vec<_> = scenario
            .steps
            .iter()
            .filter(|s| matches!(s, Step::Sleep(_)))
            .collect();
        assert_eq!(sleeps, vec![&Step::Sleep(Duration::from_secs(3)); 2]);
    }

    #[test]
    fn test_only_blocked_write_expects_timeout() {
        let timing = TimingConfig::default();
        for scenario in all_scenarios(&timing) {
            let expected = if scenario.name == "majority_write_without_quorum" {
                Expectation::TimeOut
            } else {
                Expectation::Pass
            };
            assert_eq!(scenario.expectation, expected, "{}", scenario.name);
        }
    }

    #[test]
    fn test_step_display() {
        let step = Step::Insert {
            docs: sample_people(),
            write: Some(WriteConcernLevel::Majority),
        };
        assert_eq!(step.to_string(), "insert 3 docs w:majority");
        let step = Step::ExpectCount {
            read: Some(ReadConcernLevel::Local),
            expected: 2,
        };
        assert_eq!(step.to_string(), "expect 2 docs at read:local");
        assert!(find_scenario(&TimingConfig::default(), "nope").is_none());
    }
}
