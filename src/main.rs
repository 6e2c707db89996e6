use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use todo_chain_sync::adapter::RemoteSigner;
use todo_chain_sync::sync::RecordId;
use todo_chain_sync::todo::HttpTodoStore;
use todo_chain_sync::{
	AdapterRegistry, EngineConfig, Network, OperationKind, SyncOrchestrator, TxState,
};

#[derive(Parser)]
#[command(name = "todo-chain-sync", version, about = "Mirror todos onto blockchain networks")]
struct Cli {
	/// Config file (TOML). Environment overrides apply on top of it.
	#[arg(long, short, env = "SYNC_CONFIG", global = true)]
	config: Option<PathBuf>,

	/// Print results as JSON
	#[arg(long, global = true)]
	json: bool,

	/// Debug logging for the engine
	#[arg(long, short, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Sync one todo operation and wait for the outcome
	Sync {
		todo_id: String,
		#[arg(long, short, default_value = "create")]
		operation: OperationKind,
		#[arg(long, short)]
		network: Network,
		/// Return once the request is accepted
		#[arg(long)]
		no_wait: bool,
	},
	/// Cancel an unresolved sync
	Cancel { record_id: String },
	/// Resume unresolved syncs from the state directory and follow them
	Resume,
	/// Show sync stats over all todos
	Stats,
	/// List configured networks
	Networks,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let engine_level = if cli.verbose { "debug" } else { "info" };
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(format!("todo_chain_sync={}", engine_level).parse()?)
				.add_directive(tracing::Level::WARN.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let config = EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

	if let Command::Networks = cli.command {
		return list_networks(&config, cli.json);
	}

	let orchestrator = build_engine(&config)?;
	let restored = orchestrator.restore().await?;
	if restored > 0 {
		info!("Resumed {} unresolved sync(s) from the last run", restored);
	}

	let result = run(&cli, &config, &orchestrator).await;
	if let Err(e) = orchestrator.shutdown().await {
		warn!("Shutdown did not complete cleanly: {}", e);
	}
	result
}

fn build_engine(config: &EngineConfig) -> anyhow::Result<SyncOrchestrator> {
	let signer = RemoteSigner::new(
		&config.signer.url,
		Duration::from_secs(config.signer.timeout_secs),
	)
	.context("Failed to create signer client")?;
	let registry = AdapterRegistry::from_config(config, Arc::new(signer))
		.context("Failed to create network adapters")?;
	if registry.is_empty() {
		warn!("No network is enabled; set a contract or program id for at least one network");
	}

	let store = HttpTodoStore::new(
		config.store.base_url.clone(),
		config.store.api_token.clone(),
		Duration::from_secs(config.store.timeout_secs),
	)
	.context("Failed to create todo store client")?;

	Ok(SyncOrchestrator::new(registry, Arc::new(store), &config.engine))
}

async fn run(cli: &Cli, config: &EngineConfig, orchestrator: &SyncOrchestrator) -> anyhow::Result<()> {
	match &cli.command {
		Command::Sync {
			todo_id,
			operation,
			network,
			no_wait,
		} => {
			let mut events = orchestrator.subscribe(todo_id);
			let record = orchestrator
				.request_sync(todo_id, *operation, *network)
				.await?;
			println!("{}", record.record_id);
			if *no_wait {
				return Ok(());
			}

			while let Some(event) = events.next().await {
				if cli.json {
					println!("{}", serde_json::to_string(&event)?);
				} else if let Some(drift) = &event.drift {
					println!("drift on {}: {:?}", drift.network, drift.kind);
				} else {
					match &event.explorer_url {
						Some(url) => println!("{} (attempt {}) {}", event.state, event.attempt_count, url),
						None => println!("{} (attempt {})", event.state, event.attempt_count),
					}
				}
				if event.record_id == record.record_id && event.state.is_terminal() && !event.is_advisory() {
					break;
				}
			}

			match orchestrator.record(&record.record_id) {
				Some(done) if done.state == TxState::Confirmed => Ok(()),
				Some(done) => match done.last_error {
					Some(failure) => bail!("Sync ended {}: {}", done.state, failure),
					None => bail!("Sync ended {}", done.state),
				},
				None => bail!("Record {} disappeared", record.record_id),
			}
		}
		Command::Cancel { record_id } => {
			let record = orchestrator.cancel_sync(&RecordId::from(record_id.as_str()))?;
			match record.explorer_url() {
				Some(url) => println!("{} {} {}", record.record_id, record.state, url),
				None => println!("{} {}", record.record_id, record.state),
			}
			Ok(())
		}
		Command::Resume => {
			let pending = orchestrator.get_stats().pending_count;
			info!("Following {} unresolved sync(s)", pending);
			while orchestrator.get_stats().pending_count > 0 {
				tokio::time::sleep(Duration::from_secs(1)).await;
			}
			Ok(())
		}
		Command::Stats => {
			orchestrator.refresh_todos().await?;
			let stats = orchestrator.get_stats();
			if cli.json {
				println!("{}", serde_json::to_string_pretty(&stats)?);
			} else {
				println!("{}", stats.summary());
				for (network, count) in &stats.per_network_breakdown {
					println!("  {:<18} {}", network.display_name(), count);
				}
			}
			Ok(())
		}
		Command::Networks => list_networks(config, cli.json),
	}
}

fn list_networks(config: &EngineConfig, json: bool) -> anyhow::Result<()> {
	if json {
		let enabled: Vec<_> = config.enabled_networks().map(|(network, _)| network).collect();
		println!("{}", serde_json::to_string_pretty(&enabled)?);
		return Ok(());
	}
	for (network, network_config) in &config.networks {
		println!(
			"{:<18} {:<10} {:<4} {} {}",
			network.display_name(),
			format!("{:?}", network.family()).to_lowercase(),
			if network_config.enabled { "on" } else { "off" },
			network_config.rpc_url,
			network.explorer_url()
		);
	}
	Ok(())
}
