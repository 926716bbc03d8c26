//! Scenario fixture
//!
//! Owns everything a scenario touches: the member registry, the fault
//! injector and the store handle. Before a scenario it heals every member,
//! opens a fresh client and empties the collection; after it, teardown heals
//! every member again so no partition outlives the scenario that created it.

use std::sync::Arc;

use async_trait::async_trait;
use replset_harness::fault::DockerNetwork;
use replset_harness::store::{ClusterClient, SimulatedReplicaSet};
use replset_harness::{
    FaultInjector, FaultOutcome, HarnessConfig, HarnessError, MemberRegistry, ScopedHandle,
};
use tracing::{info, warn};

use crate::runner::{self, ScenarioReport};
use crate::scenario::Scenario;

/// Opens a new client on the scenario collection
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and return an unscoped handle on the target collection
    async fn connect(&self) -> Result<ScopedHandle, HarnessError>;
}

/// Connects to a live cluster through the MongoDB driver
pub struct LiveConnector {
    config: HarnessConfig,
}

impl LiveConnector {
    /// Create a connector for the cluster described by `config`
    pub fn new(config: HarnessConfig) -> Self {
        LiveConnector { config }
    }
}

#[async_trait]
impl Connector for LiveConnector {
    async fn connect(&self) -> Result<ScopedHandle, HarnessError> {
        let client = ClusterClient::connect(&self.config.uri, self.config.direct_connection).await?;
        Ok(client.handle(&self.config.database, &self.config.collection))
    }
}

#[async_trait]
impl Connector for Arc<SimulatedReplicaSet> {
    async fn connect(&self) -> Result<ScopedHandle, HarnessError> {
        Ok(ScopedHandle::new(self.clone()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixturePhase {
    /// Healing the network, reconnecting and clearing the collection
    Preparing,
    /// Environment ready; the scenario body may run
    Ready,
    /// Reachability restored after the scenario
    TornDown,
}

/// Environment a scenario runs in, prepared and torn down around each run
pub struct ScenarioFixture {
    registry: MemberRegistry,
    injector: Arc<dyn FaultInjector>,
    connector: Arc<dyn Connector>,
    handle: ScopedHandle,
    phase: FixturePhase,
}

impl ScenarioFixture {
    /// Build a fixture and open its first client through `connector`
    pub async fn new(
        registry: MemberRegistry,
        injector: Arc<dyn FaultInjector>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, HarnessError> {
        let handle = connector.connect().await?;
        Ok(ScenarioFixture {
            registry,
            injector,
            connector,
            handle,
            phase: FixturePhase::Preparing,
        })
    }

    /// Fixture over a simulated replica set acting as both store and network
    pub fn simulated(sim: Arc<SimulatedReplicaSet>) -> Self {
        ScenarioFixture {
            registry: sim.registry(),
            injector: sim.clone(),
            handle: ScopedHandle::new(sim.clone()),
            connector: Arc::new(sim),
            phase: FixturePhase::Preparing,
        }
    }

    /// Fixture over a real cluster: driver clients and the docker network
    pub async fn connect(config: &HarnessConfig) -> Result<Self, HarnessError> {
        ScenarioFixture::new(
            config.registry(),
            Arc::new(DockerNetwork::new(&config.network)),
            Arc::new(LiveConnector::new(config.clone())),
        )
        .await
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> FixturePhase {
        self.phase
    }

    /// The fixture's view of member reachability
    pub fn registry(&self) -> &MemberRegistry {
        &self.registry
    }

    /// Unscoped handle opened by the last `prepare`
    pub fn handle(&self) -> &ScopedHandle {
        &self.handle
    }

    /// Heal every member, open a fresh client, then empty the collection
    pub async fn prepare(&mut self) -> Result<(), HarnessError> {
        self.phase = FixturePhase::Preparing;
        self.heal_all().await;
        self.handle = self.connector.connect().await?;
        let removed = self.handle.clear().await?;
        info!(removed, "collection cleared");
        self.phase = FixturePhase::Ready;
        Ok(())
    }

    /// Restore full reachability regardless of how the scenario ended
    pub async fn teardown(&mut self) {
        self.heal_all().await;
        self.phase = FixturePhase::TornDown;
    }

    /// Isolate or heal a member, keeping the registry in step
    pub async fn set_reachability(
        &mut self,
        member: &str,
        reachable: bool,
    ) -> Result<FaultOutcome, HarnessError> {
        self.registry
            .set_reachability(self.injector.as_ref(), member, reachable)
            .await
    }

    async fn heal_all(&mut self) -> Vec<(String, FaultOutcome)> {
        let outcomes = self.registry.heal_all(self.injector.as_ref()).await;
        for (member, outcome) in &outcomes {
            if let FaultOutcome::Failed(reason) = outcome {
                warn!(%member, %reason, "could not heal member");
            }
        }
        outcomes
    }

    /// prepare -> scenario -> teardown; teardown runs whatever the outcome
    pub async fn run(&mut self, scenario: &Scenario) -> ScenarioReport {
        if let Err(e) = self.prepare().await {
            self.teardown().await;
            return ScenarioReport::setup_failed(scenario, e.to_string());
        }

        let report = runner::run_scenario(self, scenario).await;
        self.teardown().await;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioOutcome;
    use replset_harness::{sample_people, Reachability, StoreError, WriteConcernLevel};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_prepare_heals_and_clears() {
        let sim = Arc::new(SimulatedReplicaSet::reference());
        let mut fixture = ScenarioFixture::simulated(sim.clone());
        assert_eq!(fixture.phase(), FixturePhase::Preparing);

        // leftovers from an earlier run
        fixture.set_reachability("mongo3", false).await.unwrap();
        fixture
            .handle()
            .with_write_concern(WriteConcernLevel::single_node())
            .insert_many(&sample_people(), Duration::from_secs(1))
            .await
            .unwrap();

        fixture.prepare().await.unwrap();

        assert_eq!(fixture.phase(), FixturePhase::Ready);
        assert_eq!(fixture.handle().count().await.unwrap(), 0);
        assert!(fixture.registry().isolated().next().is_none());
        assert!(sim.registry().isolated().next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_restores_reachability() {
        let sim = Arc::new(SimulatedReplicaSet::reference());
        let mut fixture = ScenarioFixture::simulated(sim.clone());
        fixture.prepare().await.unwrap();

        fixture.set_reachability("mongo4", false).await.unwrap();
        assert_eq!(
            sim.registry().get("mongo4").unwrap().reachability,
            Reachability::Isolated
        );

        fixture.teardown().await;
        assert_eq!(fixture.phase(), FixturePhase::TornDown);
        assert_eq!(
            sim.registry().get("mongo4").unwrap().reachability,
            Reachability::Reachable
        );
    }

    /// Hands out handles over one simulation and counts the connections
    struct CountingConnector {
        sim: Arc<SimulatedReplicaSet>,
        connects: AtomicUsize,
        fail: bool,
    }

    impl CountingConnector {
        fn new(sim: Arc<SimulatedReplicaSet>) -> Self {
            CountingConnector {
                sim,
                connects: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self) -> Result<ScopedHandle, HarnessError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StoreError::NotPrimary.into());
            }
            Ok(ScopedHandle::new(self.sim.clone()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_opens_a_fresh_client() {
        let sim = Arc::new(SimulatedReplicaSet::reference());
        let connector = Arc::new(CountingConnector::new(sim.clone()));
        let mut fixture = ScenarioFixture::new(sim.registry(), sim.clone(), connector.clone())
            .await
            .unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        let scoped = fixture
            .handle()
            .with_write_concern(WriteConcernLevel::Majority);
        fixture.prepare().await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        // the new handle carries no scope from the old one
        assert_ne!(fixture.handle().concerns(), scoped.concerns());

        let scenario = Scenario::new("empty", "no steps");
        fixture.run(&scenario).await;
        fixture.run(&scenario).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconnect_is_a_setup_failure() {
        let sim = Arc::new(SimulatedReplicaSet::reference());
        let connector = Arc::new(CountingConnector::new(sim.clone()));
        let mut fixture = ScenarioFixture::new(sim.registry(), sim.clone(), connector)
            .await
            .unwrap();
        fixture.connector = Arc::new(CountingConnector {
            fail: true,
            ..CountingConnector::new(sim.clone())
        });
        fixture.set_reachability("mongo2", false).await.unwrap();

        let report = fixture.run(&Scenario::new("empty", "no steps")).await;
        assert!(matches!(report.outcome, ScenarioOutcome::SetupFailed(_)));
        assert_eq!(fixture.phase(), FixturePhase::TornDown);
        assert!(sim.registry().isolated().next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_member_is_an_error() {
        let mut fixture = ScenarioFixture::simulated(Arc::new(SimulatedReplicaSet::reference()));
        let err = fixture.set_reachability("mongo9", false).await.unwrap_err();
        assert!(matches!(err, HarnessError::UnknownMember(_)));
    }
}
