//! `flashsale` process entry point.
//!
//! ```text
//! flashsale app         # HTTP front tier, talks to the broker
//! flashsale core        # fulfillment tier, talks to the broker
//! flashsale standalone  # both tiers over an in-process broker
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use flashsale_core::{SystemClock, ThreadDice};
use flashsale_server::back::CoreTier;
use flashsale_server::broker::{BrokerQueue, MemoryBroker};
use flashsale_server::config::SaleConfig;
use flashsale_server::discovery::{
    LoadBalancer, ServiceInstance, ServiceResolver, StaticResolver, WeightedRoundRobin,
};
use flashsale_server::front::AppTier;
use flashsale_server::network::{NetworkConfig, NetworkModule};
use flashsale_server::state::{SaleState, SeedFile};
use flashsale_server::telemetry;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "flashsale", version, about = "Flash-sale admission and fulfillment server")]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
    #[command(flatten)]
    opts: Options,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Front tier: HTTP API, admission gate, request submission.
    App,
    /// Back tier: request intake, fulfillment, result publishing.
    Core,
    /// Both tiers in one process over an in-memory broker.
    Standalone,
}

#[derive(clap::Args, Debug)]
struct Options {
    /// JSON file with products and blacklists to load at startup.
    #[arg(long, env = "FLASHSALE_CATALOG", global = true)]
    catalog: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "FLASHSALE_LOG_JSON", global = true)]
    log_json: bool,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "FLASHSALE_METRICS_ADDR", global = true)]
    metrics_addr: Option<SocketAddr>,

    #[arg(long, env = "FLASHSALE_HOST", default_value = "0.0.0.0", global = true)]
    host: String,

    #[arg(long, env = "FLASHSALE_PORT", default_value_t = 8080, global = true)]
    port: u16,

    /// Secret the fulfillment token key is derived from; required by `core` and `standalone`.
    #[arg(long, env = "FLASHSALE_TOKEN_SECRET", default_value = "", hide_env_values = true, global = true)]
    token_secret: String,

    /// Logical name of the broker service.
    #[arg(long, env = "FLASHSALE_BROKER", default_value = "broker", global = true)]
    broker: String,

    /// Broker instances as `host:port@weight`, comma separated.
    #[arg(
        long,
        env = "FLASHSALE_BROKER_INSTANCES",
        value_delimiter = ',',
        default_value = "127.0.0.1:6379@1",
        global = true
    )]
    broker_instances: Vec<String>,

    /// Client wait bound in milliseconds.
    #[arg(long, env = "FLASHSALE_WAIT_TIMEOUT_MS", default_value_t = 10_000, global = true)]
    wait_timeout_ms: u64,
}

impl Options {
    fn sale_config(&self) -> SaleConfig {
        SaleConfig {
            app_wait_result_timeout: Duration::from_millis(self.wait_timeout_ms),
            token_secret: self.token_secret.clone(),
            ..SaleConfig::default()
        }
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            ..NetworkConfig::default()
        }
    }

    async fn broker_address(&self) -> anyhow::Result<String> {
        let instances = self
            .broker_instances
            .iter()
            .map(|spec| {
                ServiceInstance::parse(spec)
                    .with_context(|| format!("invalid broker instance '{spec}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let resolver = StaticResolver::new().with_service(self.broker.clone(), instances);

        let resolved = resolver.resolve(&self.broker).await?;
        let chosen = WeightedRoundRobin::new()
            .select(&resolved)
            .with_context(|| format!("no instance for service '{}'", self.broker))?;
        Ok(chosen.address())
    }
}

#[cfg(feature = "redis")]
async fn connect_broker(opts: &Options) -> anyhow::Result<Arc<dyn BrokerQueue>> {
    let address = opts.broker_address().await?;
    info!(service = %opts.broker, %address, "connecting to broker");
    let broker = flashsale_server::broker::RedisBroker::connect(&format!("redis://{address}/0")).await?;
    Ok(Arc::new(broker))
}

#[cfg(not(feature = "redis"))]
async fn connect_broker(opts: &Options) -> anyhow::Result<Arc<dyn BrokerQueue>> {
    let address = opts.broker_address().await?;
    anyhow::bail!("broker '{address}' needs a build with the `redis` feature; use `standalone` instead")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let opts = &cli.opts;

    telemetry::init_tracing(opts.log_json)?;
    if let Some(addr) = opts.metrics_addr {
        telemetry::install_metrics(addr)?;
        info!(%addr, "metrics exporter listening");
    }

    let config = opts.sale_config();
    let state = SaleState::new(Arc::new(SystemClock), Arc::new(ThreadDice));
    if let Some(path) = &opts.catalog {
        let loaded = SeedFile::load(path)?.apply(&state.catalog, &state.blacklist)?;
        info!(path = %path.display(), products = loaded, "catalog loaded");
    }

    let broker: Arc<dyn BrokerQueue> = match cli.mode {
        Mode::Standalone => Arc::new(MemoryBroker::new()),
        Mode::App | Mode::Core => connect_broker(opts).await?,
    };
    info!(mode = ?cli.mode, "starting");

    match cli.mode {
        Mode::App => run_app(&config, opts, broker, state).await,
        Mode::Core => {
            let core = CoreTier::start(&config, broker, &state)?;
            shutdown_signal().await;
            core.stop().await;
            Ok(())
        }
        Mode::Standalone => {
            let core = CoreTier::start(&config, Arc::clone(&broker), &state)?;
            let result = run_app(&config, opts, broker, state).await;
            core.stop().await;
            result
        }
    }
}

async fn run_app(
    config: &SaleConfig,
    opts: &Options,
    broker: Arc<dyn BrokerQueue>,
    state: SaleState,
) -> anyhow::Result<()> {
    let app = AppTier::start(config, broker, state);
    let mut network = NetworkModule::new(opts.network_config(), app.service());
    let port = network.start().await?;
    info!(port, "front tier listening");

    let result = network.serve(shutdown_signal()).await;
    app.stop().await;
    result
}
