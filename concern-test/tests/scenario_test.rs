//! Scenario runs against the in-process replica set.
//!
//! Time is paused, so replication lag, grace sleeps and blocked writes all
//! resolve instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use concern_test::scenario::{
    majority_write_with_quorum, majority_write_without_quorum, normal_insert, read_majority_after_w1,
    single_node_write_with_minority_isolated,
};
use concern_test::{
    all_scenarios, run_all, Expectation, FixturePhase, Scenario, ScenarioFixture, ScenarioOutcome,
    Step,
};
use replset_harness::cluster::config::TimingConfig;
use replset_harness::store::SimulatedReplicaSet;
use replset_harness::{sample_people, FaultOutcome, ReadConcernLevel, WriteConcernLevel};

fn fixture() -> (Arc<SimulatedReplicaSet>, ScenarioFixture) {
    concern_test::trace::init_for_tests();
    let sim = Arc::new(SimulatedReplicaSet::reference());
    let fixture = ScenarioFixture::simulated(sim.clone());
    (sim, fixture)
}

#[tokio::test(start_paused = true)]
async fn test_normal_insert_passes() {
    let (_, mut fixture) = fixture();
    let report = fixture.run(&normal_insert(&TimingConfig::default())).await;

    assert_eq!(report.outcome, ScenarioOutcome::Passed, "{}", report.outcome);
    assert!(report.met_expectation());
    assert!(report.faults.is_empty());
    assert_eq!(report.history.len(), 2);
    assert_eq!(fixture.phase(), FixturePhase::TornDown);
}

#[tokio::test(start_paused = true)]
async fn test_w1_write_ignores_isolated_minority() {
    let (_, mut fixture) = fixture();
    let report = fixture
        .run(&single_node_write_with_minority_isolated(&TimingConfig::default()))
        .await;

    assert!(report.passed(), "{}", report.outcome);
    // w:1 needs nothing from the secondaries
    assert_eq!(report.elapsed, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_majority_write_with_quorum_waits_one_lag() {
    let (sim, mut fixture) = fixture();
    let report = fixture.run(&majority_write_with_quorum(&TimingConfig::default())).await;

    assert!(report.passed(), "{}", report.outcome);
    assert_eq!(report.elapsed, sim.replication_lag());

    let isolated: Vec<_> = report.faults.iter().map(|f| f.member.as_str()).collect();
    assert_eq!(isolated, vec!["mongo4", "mongo-arbiter"]);
    assert!(report
        .faults
        .iter()
        .all(|f| !f.reachable && f.outcome == FaultOutcome::Applied));
    assert_eq!(report.failed_faults().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_majority_write_without_quorum_times_out() {
    let (sim, mut fixture) = fixture();
    let scenario = majority_write_without_quorum(&TimingConfig::default());
    let report = fixture.run(&scenario).await;

    assert_eq!(report.expectation, Expectation::TimeOut);
    assert_eq!(
        report.outcome,
        ScenarioOutcome::TimedOut {
            step: 2,
            elapsed: Duration::from_secs(5)
        }
    );
    assert!(report.met_expectation());
    assert!(!report.passed());
    assert!(matches!(report.stopped_at, Some(Step::Insert { .. })));

    // teardown reconnected the partitioned members
    assert!(sim.registry().isolated().next().is_none());
    assert!(fixture.registry().isolated().next().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_read_majority_after_w1() {
    let (_, mut fixture) = fixture();
    let report = fixture.run(&read_majority_after_w1(&TimingConfig::default())).await;

    assert!(report.passed(), "{}", report.outcome);
    assert_eq!(report.elapsed, Duration::from_secs(6));
    assert!(report.check.is_consistent);

    let majority_counts: Vec<_> = report
        .history
        .reads()
        .filter(|op| op.is_majority_read())
        .filter_map(|op| op.read_count())
        .collect();
    assert_eq!(majority_counts, vec![0, 2, 2, 2]);
    assert_eq!(report.history.inserts().count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_short_grace_fails_the_read_scenario() {
    let (_, mut fixture) = fixture();
    let timing = TimingConfig {
        grace_interval_ms: 100,
        ..TimingConfig::default()
    };
    let report = fixture.run(&read_majority_after_w1(&timing)).await;

    assert_eq!(
        report.outcome,
        ScenarioOutcome::CountMismatch {
            step: 5,
            read: Some(ReadConcernLevel::Majority),
            expected: 2,
            observed: 0,
        }
    );
    assert!(!report.met_expectation());
}

#[tokio::test(start_paused = true)]
async fn test_wrong_expectation_is_a_count_mismatch() {
    let (_, mut fixture) = fixture();
    let scenario = Scenario::new("eager_majority", "a majority read right after a w:1 write")
        .insert(&sample_people(), Some(WriteConcernLevel::single_node()))
        .expect_count(Some(ReadConcernLevel::Majority), 3);
    let report = fixture.run(&scenario).await;

    assert_eq!(
        report.outcome,
        ScenarioOutcome::CountMismatch {
            step: 1,
            read: Some(ReadConcernLevel::Majority),
            expected: 3,
            observed: 0,
        }
    );
    // the observation itself was legal
    assert!(report.check.is_consistent);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_member_is_an_invalid_step() {
    let (_, mut fixture) = fixture();
    let scenario = Scenario::new("typo", "isolates a member that does not exist")
        .isolate("mongo2")
        .isolate("mongo9");
    let report = fixture.run(&scenario).await;

    assert!(matches!(report.outcome, ScenarioOutcome::InvalidStep { step: 1, .. }));
    assert_eq!(report.faults.len(), 1);
    assert!(fixture.registry().isolated().next().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unsatisfiable_write_concern_is_a_store_failure() {
    let (_, mut fixture) = fixture();
    let scenario = Scenario::new("w5", "asks for more acknowledgments than there are data-bearing members")
        .insert(&sample_people(), Some(WriteConcernLevel::Nodes(5)));
    let report = fixture.run(&scenario).await;

    match &report.outcome {
        ScenarioOutcome::StoreFailed { step, .. } => assert_eq!(*step, 0),
        other => panic!("expected a store failure, got {}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_isolating_twice_reports_already_in_state() {
    let (_, mut fixture) = fixture();
    let scenario = Scenario::new("double_isolate", "isolates the same member twice")
        .isolate("mongo3")
        .isolate("mongo3");
    let report = fixture.run(&scenario).await;

    assert!(report.passed());
    let outcomes: Vec<_> = report.faults.iter().map(|f| f.outcome.clone()).collect();
    assert_eq!(outcomes, vec![FaultOutcome::Applied, FaultOutcome::AlreadyInState]);
    assert_eq!(report.failed_faults().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_all_builtins_meet_expectations_in_sequence() {
    let (_, mut fixture) = fixture();
    let reports = run_all(&mut fixture, &all_scenarios(&TimingConfig::default())).await;

    assert_eq!(reports.len(), 5);
    for report in &reports {
        assert!(report.met_expectation(), "{}: {}", report.name, report.outcome);
        assert!(report.check.is_consistent, "{}: {:?}", report.name, report.check.violations);
    }

    let summary = reports[3].summary();
    assert_eq!(summary.name, "majority_write_without_quorum");
    assert!(summary.met_expectation);
    assert_eq!(summary.elapsed_ms, 5000);
}

#[tokio::test(start_paused = true)]
async fn test_sleeping_past_the_deadline_is_not_a_blocked_write() {
    let (_, mut fixture) = fixture();
    let scenario = Scenario::new("slow", "sleeps past its deadline without writing")
        .sleep(Duration::from_secs(10))
        .expecting(Expectation::TimeOut);
    let report = fixture.run(&scenario).await;

    assert!(report.timed_out());
    assert_eq!(report.stopped_at, Some(Step::Sleep(Duration::from_secs(10))));
    assert!(!report.met_expectation());
}
