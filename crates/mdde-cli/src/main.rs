//! MDDE - registry control CLI
//!
//! The `mdde` command drives a running data-distribution registry over TCP.
//!
//! ## Commands
//!
//! - `init`: flush, regenerate and snapshot the registry for a scenario
//! - `reset`: roll the registry back to its default snapshot
//! - `mode`: show or switch the registry mode
//! - `allocation`: print the node x fragment allocation matrix
//! - `actions`: list an agent's action table
//! - `benchmark`: run the scenario's benchmark workload
//! - `dump`: print the registry's full state as JSON

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};

use mdde_core::{
    init_tracing, ActionTable, AgentId, AllocationMatrix, DefaultScenario, Environment,
    NaturalOrdering, RegistryLifecycleOrchestrator, RegistryPorts, Scenario, ScenarioConfig,
};
use mdde_registry::{
    RegistryClientConfig, RegistryClientTcp, RegistryControlPort, RegistryMode, RegistryReadPort,
};

#[derive(Parser)]
#[command(name = "mdde")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Drive an MDDE data-distribution registry", long_about = None)]
struct Cli {
    /// Registry host (overrides MDDE_REGISTRY_HOST)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Registry control port (overrides MDDE_REGISTRY_PORT)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Per-call timeout in milliseconds (overrides MDDE_REGISTRY_TIMEOUT_MS)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the registry into the scenario's initial state
    Init {
        /// Scenario file (JSON)
        scenario: PathBuf,
    },

    /// Roll the registry back to its default snapshot
    Reset,

    /// Show the registry mode, or switch it
    Mode {
        /// Target mode; omit to print the current one
        #[arg(value_enum)]
        target: Option<ModeArg>,
    },

    /// Print the allocation matrix in observation order
    Allocation {
        /// Scenario file (JSON)
        scenario: PathBuf,
    },

    /// List the action table of one agent
    Actions {
        /// Scenario file (JSON)
        scenario: PathBuf,

        /// Agent id
        #[arg(short, long, default_value = "0")]
        agent: u32,
    },

    /// Run the scenario's benchmark workload
    Benchmark {
        /// Scenario file (JSON)
        scenario: PathBuf,

        /// Number of benchmark workers (default: scenario setting)
        #[arg(short, long)]
        workers: Option<u32>,
    },

    /// Print the full registry state as JSON
    Dump,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Benchmark,
    Shuffle,
}

impl From<ModeArg> for RegistryMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Benchmark => RegistryMode::Benchmark,
            ModeArg::Shuffle => RegistryMode::Shuffle,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let mut config =
        RegistryClientConfig::from_env().context("Invalid registry settings in environment")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ms) = cli.timeout_ms {
        config = config.with_timeout(Duration::from_millis(ms));
    }
    info!(address = %config.address(), "using registry");
    let client = Arc::new(RegistryClientTcp::new(config));

    let result = match cli.command {
        Commands::Init { scenario } => cmd_init(&client, &scenario).await,
        Commands::Reset => cmd_reset(&client).await,
        Commands::Mode { target } => cmd_mode(&client, target).await,
        Commands::Allocation { scenario } => cmd_allocation(&client, &scenario).await,
        Commands::Actions { scenario, agent } => cmd_actions(&client, &scenario, agent).await,
        Commands::Benchmark { scenario, workers } => {
            cmd_benchmark(&client, &scenario, workers).await
        }
        Commands::Dump => cmd_dump(&client).await,
    };
    client.close().await;
    result
}

fn load_scenario(path: &Path) -> Result<(ScenarioConfig, Arc<DefaultScenario>)> {
    let config = ScenarioConfig::load(path)
        .with_context(|| format!("Failed to load scenario {}", path.display()))?;
    let scenario = DefaultScenario::from_config(&config)?;
    Ok((config, Arc::new(scenario)))
}

/// Run the initialization sequence for a scenario
async fn cmd_init(client: &Arc<RegistryClientTcp>, path: &Path) -> Result<()> {
    let (config, scenario) = load_scenario(path)?;
    let mut env = Environment::new(
        config.env.clone(),
        scenario,
        RegistryPorts::from_client(client.clone()),
    )?;

    let report = env
        .initialize()
        .await
        .context("Registry initialization failed")?;

    println!("Scenario:  {}", config.name);
    println!("Snapshot:  {}", report.snapshot);
    println!("Nodes:     {}", report.nodes.len());
    println!("Fragments: {}", report.fragments.len());
    println!("Shuffled:  {}", report.shuffled);
    println!(
        "Duration:  {} ms",
        (report.finished_at - report.started_at).num_milliseconds()
    );
    Ok(())
}

/// Roll back to the registry's default snapshot
async fn cmd_reset(client: &Arc<RegistryClientTcp>) -> Result<()> {
    // The snapshot handle lives in the registry; this process never created it.
    let orchestrator = RegistryLifecycleOrchestrator::new(RegistryPorts::from_client(client.clone()));
    orchestrator.ensure_mode(RegistryMode::Shuffle).await?;
    client
        .reset_to_default_snapshot()
        .await
        .raise_on_error()
        .context("Reset to default snapshot failed")?;
    println!("Registry reset to default snapshot");
    Ok(())
}

/// Show or switch the registry mode
async fn cmd_mode(client: &Arc<RegistryClientTcp>, target: Option<ModeArg>) -> Result<()> {
    let Some(target) = target else {
        let mode = client
            .get_mode()
            .await
            .raise_on_error()
            .context("Failed to query registry mode")?
            .unwrap_or(RegistryMode::Unknown);
        println!("{mode}");
        return Ok(());
    };

    let orchestrator = RegistryLifecycleOrchestrator::new(RegistryPorts::from_client(client.clone()));
    let target = RegistryMode::from(target);
    orchestrator.ensure_mode(target).await?;
    println!("Registry is in {target} mode");
    Ok(())
}

/// Print the allocation matrix
async fn cmd_allocation(client: &Arc<RegistryClientTcp>, path: &Path) -> Result<()> {
    let (_, scenario) = load_scenario(path)?;
    let allocation =
        AllocationMatrix::read(client.as_ref(), scenario.agents(), &NaturalOrdering).await?;

    let width = allocation
        .nodes()
        .iter()
        .map(|n| n.as_str().len())
        .max()
        .unwrap_or(4)
        .max(4);
    print!("{:width$}", "node");
    for fragment in allocation.fragments() {
        print!(" {:>4}", fragment.as_str());
    }
    println!();
    for (row, node) in allocation.nodes().iter().enumerate() {
        print!("{:width$}", node.as_str());
        for cell in allocation.row(row) {
            print!(" {cell:>4}");
        }
        println!();
    }
    Ok(())
}

/// List one agent's action table
async fn cmd_actions(client: &Arc<RegistryClientTcp>, path: &Path, agent: u32) -> Result<()> {
    let (_, scenario) = load_scenario(path)?;
    let Some(binding) = scenario.agents().iter().find(|a| a.id() == AgentId(agent)) else {
        bail!("Scenario has no agent {agent}");
    };
    let allocation =
        AllocationMatrix::read(client.as_ref(), scenario.agents(), &NaturalOrdering).await?;
    let table = ActionTable::build(binding, allocation.nodes(), allocation.fragments());

    println!("Agent {} ({}): {} actions", agent, binding.name(), table.len());
    for (index, action) in table.actions().iter().enumerate() {
        println!("{index:>6}  {action}");
    }
    Ok(())
}

/// Run a benchmark and print per-node reads
async fn cmd_benchmark(
    client: &Arc<RegistryClientTcp>,
    path: &Path,
    workers: Option<u32>,
) -> Result<()> {
    let (config, scenario) = load_scenario(path)?;
    let mut env_config = config.env.clone();
    if let Some(workers) = workers {
        env_config = env_config.with_benchmark_workers(workers);
    }
    let env = Environment::new(
        env_config,
        scenario,
        RegistryPorts::from_client(client.clone()),
    )?;

    let bench = env.benchmark().await.context("Benchmark failed")?;
    println!("Throughput: {:.3}", bench.throughput);
    for (row, node) in bench.nodes.iter().enumerate() {
        let total: u64 = (0..bench.fragments.len())
            .map(|col| bench.reads_at(row, col))
            .sum();
        println!("  {node}: {total} reads");
    }
    Ok(())
}

/// Print the registry debug dump
async fn cmd_dump(client: &Arc<RegistryClientTcp>) -> Result<()> {
    let dump = client
        .dump()
        .await
        .raise_on_error()
        .context("Failed to dump registry")?
        .unwrap_or(serde_json::Value::Null);
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}
