//! Replica set concern harness CLI
//!
//! Bootstraps the replica set, injects network faults by hand, and runs the
//! built-in concern scenarios against a live cluster or the in-process
//! simulation.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use concern_test::trace::{self, LogFormat};
use concern_test::{all_scenarios, find_scenario, run_all, ScenarioFixture, ScenarioReport};
use replset_harness::bootstrap::{self, ReplicaSetConfig};
use replset_harness::fault::DockerNetwork;
use replset_harness::store::{ClusterClient, SimulatedReplicaSet};
use replset_harness::HarnessConfig;

#[derive(Parser, Debug)]
#[command(name = "replset-harness")]
#[command(about = "Check replica set read/write concern behaviour under network partitions")]
#[command(version)]
struct Args {
    /// TOML config file; defaults describe the five-member reference cluster
    #[arg(long, short = 'c', env = "REPLSET_HARNESS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Override the scenario connection string
    #[arg(long, global = true)]
    uri: Option<String>,

    /// Override the docker network name
    #[arg(long, global = true)]
    network: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initiate the replica set (an initialized set is left as is)
    Init,
    /// Show each member's replica set state
    Status,
    /// Disconnect a member from the cluster network
    Isolate { member: String },
    /// Reconnect one member, or every member when none is given
    Heal { member: Option<String> },
    /// List the built-in scenarios
    List,
    /// Run scenarios (all of them when none are named)
    Run {
        scenarios: Vec<String>,
        /// Run against the in-process replica set model instead of a live cluster
        #[arg(long)]
        simulated: bool,
        /// Replication lag of the simulated replica set, in milliseconds
        #[arg(long, default_value = "500")]
        replication_lag_ms: u64,
    },
}

impl Args {
    fn load_config(&self) -> anyhow::Result<HarnessConfig> {
        let mut config = HarnessConfig::load(self.config.as_deref())?;
        if let Some(uri) = &self.uri {
            config = config.with_uri(uri.clone());
        }
        if let Some(network) = &self.network {
            config = config.with_network(network.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    trace::init(args.log_format);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = args.load_config()?;

    match &args.command {
        Command::Init => {
            let client = ClusterClient::connect(&config.admin_uri, true).await?;
            let rs_config = ReplicaSetConfig::from_registry(&config.replica_set, &config.registry());
            let outcome = bootstrap::initiate(&client, &rs_config).await?;
            println!("{:?}", outcome);
        }
        Command::Status => {
            let client = ClusterClient::connect(&config.admin_uri, true).await?;
            let status = bootstrap::replica_set_status(&client).await?;
            if args.json {
                let members: Vec<_> = status
                    .members
                    .iter()
                    .map(|m| serde_json::json!({ "name": m.name, "state": m.state, "health": m.health }))
                    .collect();
                println!("{}", serde_json::json!({ "set": status.set, "members": members }));
            } else {
                println!("Replica set {}:", status.set);
                for member in &status.members {
                    println!("  {}: {}", member.name, member.state);
                }
            }
        }
        Command::Isolate { member } => {
            let mut registry = config.registry();
            let injector = DockerNetwork::new(&config.network);
            let outcome = registry.isolate(&injector, member).await?;
            println!("{}: {:?}", member, outcome);
        }
        Command::Heal { member } => {
            let mut registry = config.registry();
            let injector = DockerNetwork::new(&config.network);
            match member {
                Some(name) => {
                    let outcome = registry.heal(&injector, name).await?;
                    println!("{}: {:?}", name, outcome);
                }
                None => {
                    for (name, outcome) in registry.heal_all(&injector).await {
                        println!("{}: {:?}", name, outcome);
                    }
                }
            }
        }
        Command::List => {
            for scenario in all_scenarios(&config.timing) {
                println!("{:<45} {}", scenario.name, scenario.description);
            }
        }
        Command::Run {
            scenarios,
            simulated,
            replication_lag_ms,
        } => {
            let selected = if scenarios.is_empty() {
                all_scenarios(&config.timing)
            } else {
                scenarios
                    .iter()
                    .map(|name| {
                        find_scenario(&config.timing, name)
                            .with_context(|| format!("unknown scenario '{}'", name))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?
            };

            let mut fixture = if *simulated {
                ScenarioFixture::simulated(Arc::new(SimulatedReplicaSet::new(
                    config.registry(),
                    Duration::from_millis(*replication_lag_ms),
                )))
            } else {
                ScenarioFixture::connect(&config).await?
            };

            let reports = run_all(&mut fixture, &selected).await;
            print_reports(&reports, args.json)?;

            if !reports.iter().all(ScenarioReport::met_expectation) {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_reports(reports: &[ScenarioReport], json: bool) -> anyhow::Result<()> {
    if json {
        let summaries: Vec<_> = reports.iter().map(ScenarioReport::summary).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    for report in reports {
        let mark = if report.met_expectation() { "ok" } else { "FAILED" };
        println!(
            "{:<6} {:<45} {} ({:?}, {} ops)",
            mark,
            report.name,
            report.outcome,
            report.elapsed,
            report.history.len()
        );
        for fault in report.failed_faults() {
            println!("       fault on {} did not apply: {:?}", fault.member, fault.outcome);
        }
    }
    Ok(())
}
