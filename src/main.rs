use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::ctrl_c;
use tracing::{error, info, warn};
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "metrics")]
use shardline::config::context::setup_metrics;
use shardline::{
    cli::ShardlineCli,
    config::{
        context::build_context,
        schema::{load_config, Metrics},
    },
    frontend::http::run_server,
};

#[derive(Debug, Parser)]
#[clap(name = "shardline", about = "Catalog and batch ingestion for a sharded HTAP store")]
struct Args {
    #[clap(short, long = "config", default_value = "shardline.toml")]
    config_path: PathBuf,

    #[clap(long, help = "Run the interactive CLI instead of the HTTP frontend")]
    cli: bool,

    #[clap(long, help = "Emit logs as JSON lines")]
    json_logs: bool,
}

fn prepare_tracing(json_logs: bool) {
    // Redirect all `log`'s events to our subscriber, to collect the ones from our deps too
    if let Err(e) = LogTracer::init() {
        eprintln!("Couldn't bridge log records into tracing: {e}");
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("shardline=info,warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    let result = if json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };

    if let Err(e) = result {
        eprintln!("Couldn't set up logging: {e}");
    }
}

#[cfg(feature = "metrics")]
fn prepare_metrics(metrics: &Metrics) {
    if let Err(e) = setup_metrics(metrics) {
        error!("{e}");
        exit(1);
    }
}

#[cfg(not(feature = "metrics"))]
fn prepare_metrics(_metrics: &Metrics) {
    warn!("Metrics are configured, but shardline was built without the metrics feature");
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    prepare_tracing(args.json_logs);

    info!("Starting shardline {}", env!("CARGO_PKG_VERSION"));

    let config = match load_config(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading the config from {:?}: {e}", args.config_path);
            exit(1);
        }
    };

    if let Some(ref metrics) = config.misc.metrics {
        prepare_metrics(metrics);
    }

    let context = match build_context(&config).await {
        Ok(context) => Arc::new(context),
        Err(e) => {
            error!("Error setting up the catalog: {e}");
            exit(1);
        }
    };

    if args.cli {
        let mut cli = match ShardlineCli::new(context).await {
            Ok(cli) => cli,
            Err(e) => {
                error!("{e}");
                exit(1);
            }
        };
        if let Err(e) = cli.repl_loop().await {
            error!("{e}");
            exit(1);
        }
        return;
    }

    let Some(http) = config.frontend.http.clone() else {
        warn!("No frontend configured, exiting. Add a [frontend.http] section or run with --cli");
        return;
    };

    let shutdown = async {
        if let Err(e) = ctrl_c().await {
            error!("Couldn't listen for Ctrl-C: {e}");
        }
        info!("Shutting down...");
    };

    if let Err(e) = run_server(context, http, shutdown).await {
        error!("{e}");
        exit(1);
    }
}
