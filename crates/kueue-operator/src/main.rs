//! Kueue controller - ClusterQueue status and ResourceFlavor reference management

mod controller_runner;
mod workload_feed;

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use kueue_common::crd::{ClusterQueue, ResourceFlavor, Workload};
use kueue_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use kueue_common::FIELD_MANAGER;

use controller_runner::{build_cluster_queue_controllers, ControllerSettings};

const DEFAULT_WORKERS: usize = 4;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const DEFAULT_WATCH_TIMEOUT_SECS: u32 = 25;

const DEFAULT_RESYNC_SECS: u64 = 300;

/// Kueue - ClusterQueue controller
#[derive(Parser, Debug)]
#[command(name = "kueue-controller", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormatArg::Json, global = true)]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches ClusterQueues and Workloads, keeps ClusterQueue status and
    /// ResourceFlavor back-references up to date.
    Controller(ControllerArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
struct ControllerArgs {
    /// Concurrent ClusterQueue reconciles
    #[arg(long, env = "KUEUE_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Server-side watch timeout in seconds
    #[arg(
        long,
        env = "KUEUE_WATCH_TIMEOUT_SECS",
        default_value_t = DEFAULT_WATCH_TIMEOUT_SECS
    )]
    watch_timeout_secs: u32,

    /// Re-queue every ClusterQueue on this period; 0 disables
    #[arg(long, env = "KUEUE_RESYNC_SECS", default_value_t = DEFAULT_RESYNC_SECS)]
    resync_secs: u64,

    /// Assume CRDs are already installed
    #[arg(long)]
    skip_crd_install: bool,
}

impl Default for ControllerArgs {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            watch_timeout_secs: DEFAULT_WATCH_TIMEOUT_SECS,
            resync_secs: DEFAULT_RESYNC_SECS,
            skip_crd_install: false,
        }
    }
}

impl ControllerArgs {
    fn settings(&self) -> ControllerSettings {
        ControllerSettings {
            workers: self.workers.max(1),
            watch_timeout_secs: self.watch_timeout_secs,
            resync: (self.resync_secs > 0).then(|| Duration::from_secs(self.resync_secs)),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormatArg {
    Json,
    Text,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Text => LogFormat::Text,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crd_manifests()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        log_format: cli.log_format.into(),
        ..Default::default()
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    match cli.command {
        Some(Commands::Controller(args)) => run_controller(args).await,
        None => run_controller(ControllerArgs::default()).await,
    }
}

/// All CRDs as one multi-document YAML stream
fn crd_manifests() -> anyhow::Result<String> {
    let docs = [
        serde_yaml::to_string(&ClusterQueue::crd()),
        serde_yaml::to_string(&ResourceFlavor::crd()),
        serde_yaml::to_string(&Workload::crd()),
    ];
    let mut out = String::new();
    for doc in docs {
        let doc = doc.map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        out.push_str("---\n");
        out.push_str(&doc);
    }
    Ok(out)
}

/// Ensure all Kueue CRDs are installed
///
/// Server-side apply keeps the installed CRD versions matching the controller version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [ClusterQueue::crd(), ResourceFlavor::crd(), Workload::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD...");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install {} CRD: {}", name, e))?;
    }

    tracing::info!("All Kueue CRDs installed/updated");
    Ok(())
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!("Kueue controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if args.skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        ensure_crds_installed(&client).await?;
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    tracing::info!("Starting controllers:");
    let controllers = build_cluster_queue_controllers(client, &args.settings(), shutdown);
    futures::future::join_all(controllers).await;

    tracing::info!("Kueue controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
