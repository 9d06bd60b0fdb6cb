use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};
use whispr_client::{telemetry, WhisprClient, WhisprClientConfig};
use whispr_substrate::{
    types::{ComputationDefinition, SubmitterIdentity},
    LocalCluster, LocalClusterConfig,
};
use whispr_utils::{spawn_with_shutdown, FieldElement};

/// Runs confidential swaps against an in-process execution cluster
#[derive(Parser)]
struct SwapArgs {
    /// Path to a config file with `whispr_client` and `whispr_local_cluster` sections
    #[arg(short, long)]
    config_path: Option<PathBuf>,

    /// Amount offered in each swap
    #[arg(long, default_value_t = 10_000_000)]
    amount: u64,

    /// Minimum amount accepted in return
    #[arg(long, default_value_t = 8_000_000)]
    min_amount: u64,

    /// Number of swaps to run concurrently
    #[arg(short, long, default_value_t = 1)]
    requests: usize,

    #[arg(long, default_value = "alice")]
    submitter: String,

    /// Also write JSON logs to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct SwapReport {
    request: usize,
    submitter: String,
    amount: u64,
    min_amount: u64,
    outputs: Vec<String>,
}

fn display_field(value: &FieldElement) -> String {
    value
        .to_u128()
        .map_or_else(|| format!("{value:?}"), |value| value.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = SwapArgs::parse();
    // Keep the guard alive so the file writer flushes on exit
    let _log_guard =
        telemetry::setup_logging(args.log_dir.as_deref()).context("Failed to setup logging")?;

    let (client_config, cluster_config) = match &args.config_path {
        Some(path) => (
            WhisprClientConfig::from_file_path(path).context("Failed to load client config")?,
            LocalClusterConfig::from_file_path(path).context("Failed to load cluster config")?,
        ),
        None => (WhisprClientConfig::default(), LocalClusterConfig::default()),
    };

    info!(
        target = "whispr-swap",
        event = "whispr-swap-start",
        program_id = %client_config.program_id,
        requests = args.requests,
        "Starting confidential swaps"
    );

    let cluster = Arc::new(LocalCluster::new(cluster_config));
    let client = Arc::new(
        WhisprClient::connect(cluster, client_config)
            .await
            .context("Failed to connect to the execution cluster")?,
    );

    let (shutdown_sender, mut shutdown_receiver) = watch::channel(false);
    let (report_sender, report_receiver) = flume::unbounded();
    let handles = (0..args.requests)
        .map(|request| {
            let client = client.clone();
            let report_sender = report_sender.clone();
            let submitter = SubmitterIdentity::new(args.submitter.clone());
            let (amount, min_amount) = (args.amount, args.min_amount);
            spawn_with_shutdown(
                async move {
                    let outputs = client
                        .run_confidential_computation(
                            &ComputationDefinition::new("compute_swap"),
                            &[FieldElement::from(amount), FieldElement::from(min_amount)],
                            &submitter,
                        )
                        .await
                        .with_context(|| format!("Swap {request} failed"))?;
                    report_sender
                        .send(SwapReport {
                            request,
                            submitter: submitter.to_string(),
                            amount,
                            min_amount,
                            outputs: outputs.iter().map(display_field).collect(),
                        })
                        .context("Failed to report swap outputs")?;
                    Ok(())
                },
                shutdown_sender.clone(),
            )
        })
        .collect::<Vec<_>>();
    drop(report_sender);

    tokio::select! {
        results = join_all(handles) => {
            for result in results {
                if let Err(e) = result.context("Swap task panicked")? {
                    error!(
                        target = "whispr-swap",
                        event = "swap-failed",
                        error = %e,
                        "Swap did not complete"
                    );
                }
            }
        }
        _ = shutdown_receiver.changed() => {
            anyhow::bail!("A swap failed, shutting down");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
            info!(
                target = "whispr-swap",
                event = "whispr-swap-stop",
                "ctrl-c received, abandoning pending swaps"
            );
            return Ok(());
        }
    }

    for report in report_receiver.drain() {
        println!("{}", serde_json::to_string(&report)?);
    }
    info!(
        target = "whispr-swap",
        event = "whispr-swap-stop",
        "All swaps completed"
    );
    Ok(())
}
