//! qsync CLI - queue execution client for the remote authority.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use qsync_client::{ApiClient, ClientConfig, QueueItemSpec, RemoteAuthority};
use qsync_core::{
    CreatedBy, GroupId, Payload, QueueItem, QueueItemId, QueueItemStatus, UnitId,
};
use qsync_runner::{
    HeartbeatMonitor, RunnerConfig, SyncEngine, UnitMirror, UnitRunner, WorkHandler, WorkOutput,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "qsync")]
#[command(about = "Remote work queue client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List groups
    Groups,
    /// Create a group
    CreateGroup {
        /// Group name
        name: String,
        /// Description
        #[arg(long)]
        description: Option<String>,
    },
    /// List the units of a group
    Units {
        /// Group ID
        group: String,
    },
    /// Create a unit under a group
    CreateUnit {
        /// Group ID
        group: String,
        /// Unit name
        name: String,
        /// Configuration as a JSON object
        #[arg(long, default_value = "{}")]
        config: String,
        /// Description
        #[arg(long)]
        description: Option<String>,
    },
    /// List a unit's queue items
    Queue {
        /// Unit ID
        unit: String,
        /// Filter by status (pending, running, completed, failed)
        #[arg(long)]
        status: Option<String>,
    },
    /// Append a queue item to a unit
    Add {
        /// Unit ID
        unit: String,
        /// Item name
        name: String,
        /// Parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Show queue item details
    Show {
        /// Queue item ID
        id: String,
    },
    /// Submit a new execution order for a unit's pending items
    Reorder {
        /// Unit ID
        unit: String,
        /// Every pending queue item ID, in the desired order
        ids: Vec<String>,
    },
    /// Show a unit and its queue counts
    Status {
        /// Unit ID
        unit: String,
    },
    /// Execute a unit's queue with an external command
    Run {
        /// Unit ID
        unit: String,
        /// Program invoked per item as: PROG <name> <parameters-json>
        #[arg(long)]
        exec: String,
        /// Seconds between idle polls
        #[arg(long, default_value = "5")]
        poll_secs: u64,
        /// Keep polling for new work after the queue drains
        #[arg(long)]
        keep_alive: bool,
        /// Stop after this many items
        #[arg(long)]
        max_items: Option<usize>,
    },
    /// Watch a unit: heartbeat and print queue changes until Ctrl-C
    Watch {
        /// Unit ID
        unit: String,
        /// Seconds between syncs
        #[arg(long, default_value = "6")]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = ClientConfig::from_env()?;
    let client = Arc::new(ApiClient::new(config)?);

    match cli.command {
        Commands::Groups => {
            let groups = client.list_groups().await?;
            println!("Groups ({})", groups.len());
            for group in groups {
                println!("  {} | {}", group.id, group.name);
            }
        }
        Commands::CreateGroup { name, description } => {
            let id = client
                .create_group(&name, description.as_deref(), Payload::new())
                .await?;
            println!("Created group: {id} - {name}");
        }
        Commands::Units { group } => {
            let units = client.list_units(&GroupId::new(group)).await?;
            println!("Units ({})", units.len());
            for unit in units {
                println!(
                    "  {} | v{} | {} | {}",
                    unit.id, unit.version, unit.connection_status, unit.name,
                );
            }
        }
        Commands::CreateUnit {
            group,
            name,
            config,
            description,
        } => {
            let config = parse_payload(&config).context("invalid --config")?;
            let (id, version) = client
                .create_unit(&GroupId::new(group), &name, config, description.as_deref())
                .await?;
            println!("Created unit: {id} (version {version}) - {name}");
        }
        Commands::Queue { unit, status } => {
            let status = match status {
                Some(s) => Some(parse_status(&s).context("invalid --status")?),
                None => None,
            };
            let items = client.list_items(&UnitId::new(unit), status).await?;
            println!("Queue items ({})", items.len());
            for item in items {
                print_item_line(&item);
            }
        }
        Commands::Add { unit, name, params } => {
            let parameters = parse_payload(&params).context("invalid --params")?;
            let item = client
                .create_item(
                    &UnitId::new(unit),
                    QueueItemSpec::new(&name, parameters),
                    CreatedBy::Client,
                )
                .await?;
            println!("Added queue item: {} (order {}) - {}", item.id, item.order, item.name);
        }
        Commands::Show { id } => {
            let item = client.get_item(&QueueItemId::new(id)).await?;
            println!("Queue item: {}", item.id);
            println!("  Unit: {}", item.unit_id);
            println!("  Name: {}", item.name);
            println!("  Status: {}", format_status(item.status));
            println!("  Order: {}", item.order);
            if let Some(result) = &item.result {
                println!("  Result: {}", serde_json::Value::Object(result.clone()));
            }
            if let Some(metrics) = &item.metrics {
                println!("  Metrics: {}", serde_json::Value::Object(metrics.clone()));
            }
            if let Some(error_msg) = &item.error_msg {
                println!("  Error: {error_msg}");
            }
            if let Some(created_at) = item.created_at {
                println!("  Created: {created_at}");
            }
        }
        Commands::Reorder { unit, ids } => {
            if ids.is_empty() {
                bail!("at least one queue item ID is required");
            }
            let ids: Vec<QueueItemId> = ids.into_iter().map(QueueItemId::new).collect();
            let response = client.reorder_items(&UnitId::new(unit), &ids).await?;
            println!("Reordered {} items", response.count);
        }
        Commands::Status { unit } => {
            let unit_id = UnitId::new(unit);
            let unit = client.get_unit(&unit_id).await?;
            let items = client.list_items(&unit_id, None).await?;

            println!("Unit: {} - {}", unit.id, unit.name);
            println!("  Version: {}", unit.version);
            println!("  Connection: {}", unit.connection_status);
            if let Some(last_heartbeat) = unit.last_heartbeat {
                println!("  Last heartbeat: {last_heartbeat}");
            }
            println!("  Queue ({} items)", items.len());
            for status in &[
                QueueItemStatus::Pending,
                QueueItemStatus::Running,
                QueueItemStatus::Completed,
                QueueItemStatus::Failed,
            ] {
                let count = items.iter().filter(|i| i.status == *status).count();
                if count > 0 {
                    println!("    {}: {}", format_status(*status), count);
                }
            }
        }
        Commands::Run {
            unit,
            exec,
            poll_secs,
            keep_alive,
            max_items,
        } => {
            run_unit(client, unit, exec, poll_secs, keep_alive, max_items).await?;
        }
        Commands::Watch {
            unit,
            interval_secs,
        } => {
            watch_unit(client, unit, interval_secs).await?;
        }
    }

    Ok(())
}

/// Work handler that shells out: `PROG <name> <parameters-json>`.
///
/// A zero exit marks the item completed; stdout is used as the result
/// blob when it parses as a JSON object, otherwise it is wrapped under
/// a `stdout` key. A non-zero exit marks the item failed with stderr
/// as the error message.
struct ExecHandler {
    program: String,
}

#[async_trait]
impl WorkHandler for ExecHandler {
    async fn run(&self, item: &QueueItem) -> Result<WorkOutput> {
        let parameters = serde_json::Value::Object(item.parameters.clone()).to_string();

        let output = tokio::process::Command::new(&self.program)
            .arg(&item.name)
            .arg(&parameters)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let result = match serde_json::from_str(stdout.trim()) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => {
                let mut map = Payload::new();
                map.insert("stdout".to_string(), stdout.trim().into());
                map
            }
        };

        Ok(WorkOutput::new(result))
    }
}

async fn run_unit(
    client: Arc<ApiClient>,
    unit: String,
    exec: String,
    poll_secs: u64,
    keep_alive: bool,
    max_items: Option<usize>,
) -> Result<()> {
    let mut unit = client.get_unit(&UnitId::new(unit)).await?;
    // Start behind the authority so the first sync adopts a snapshot.
    unit.version = 0;

    let authority: Arc<dyn RemoteAuthority> = client;
    let handler = Arc::new(ExecHandler { program: exec });

    let mut runner = UnitRunner::new(Arc::clone(&authority), unit, handler).with_config(
        RunnerConfig {
            poll_interval: Duration::from_secs(poll_secs),
            exit_when_drained: !keep_alive,
            max_cycles: max_items,
        },
    );

    let cancel = runner.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current item");
            cancel.cancel();
        }
    });

    let heartbeat = HeartbeatMonitor::new(authority, &runner.mirror()).start();
    let outcome = runner.run().await;
    heartbeat.stop().await;
    outcome?;

    println!("Executed {} items", runner.cycles());
    Ok(())
}

async fn watch_unit(client: Arc<ApiClient>, unit: String, interval_secs: u64) -> Result<()> {
    let mut unit = client.get_unit(&UnitId::new(unit)).await?;
    unit.version = 0;

    let authority: Arc<dyn RemoteAuthority> = client;
    let mirror = Arc::new(UnitMirror::new(unit));
    let sync = SyncEngine::new(Arc::clone(&authority), Arc::clone(&mirror));
    let heartbeat = HeartbeatMonitor::new(authority, &mirror).start();

    loop {
        let outcome = sync.sync().await?;
        if outcome.changed {
            let items = mirror.items().await;
            println!("Version {} ({} items)", outcome.version, items.len());
            for item in items {
                print_item_line(&item);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    heartbeat.stop().await;
    Ok(())
}

fn print_item_line(item: &QueueItem) {
    println!(
        "  {} | {} | {} | {}",
        item.id,
        format_status(item.status),
        item.order,
        item.name,
    );
}

fn parse_payload(s: &str) -> Result<Payload> {
    match serde_json::from_str(s)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("expected a JSON object"),
    }
}

fn parse_status(s: &str) -> Result<QueueItemStatus> {
    match s.to_lowercase().as_str() {
        "pending" => Ok(QueueItemStatus::Pending),
        "running" => Ok(QueueItemStatus::Running),
        "completed" => Ok(QueueItemStatus::Completed),
        "failed" => Ok(QueueItemStatus::Failed),
        _ => bail!("unknown status: {s}"),
    }
}

fn format_status(status: QueueItemStatus) -> &'static str {
    match status {
        QueueItemStatus::Pending => "PENDING",
        QueueItemStatus::Running => "RUNNING",
        QueueItemStatus::Completed => "COMPLETED",
        QueueItemStatus::Failed => "FAILED",
    }
}
