//! Standalone provider exposing a built-in echo service
//!
//! Loads a `LuixConfig`, exports the echo service through the configured
//! protocol and registries, and withdraws it again on SIGINT or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use luix_rpc::{
    LuixConfig, LuixRuntime, ProviderExporter, RemoteError, ServiceHandler,
};
use luix_registry::SmolSpawner;
use serde_json::Value;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

/// Interface name of the built-in service
const ECHO_SERVICE: &str = "com.luix.Echo";

#[derive(Parser, Debug)]
#[command(name = "luix-provider")]
#[command(about = "Expose an echo service over luix RPC", long_about = None)]
struct Args {
    /// YAML or JSON configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Form of the exported service
    #[arg(long)]
    form: Option<String>,

    /// Version of the exported service
    #[arg(long)]
    version: Option<String>,
}

fn echo_service() -> ServiceHandler {
    ServiceHandler::new(ECHO_SERVICE)
        .method("echo", &["String"], |args: Vec<Value>, _ctx| async move {
            args.into_iter()
                .next()
                .ok_or_else(|| RemoteError::new("IllegalArgument", "echo expects one argument"))
        })
        .method("ping", &[], |_args: Vec<Value>, _ctx| async move {
            Ok(Value::from("pong"))
        })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();
    let config = LuixConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, interrupted.clone())?;
    signal_hook::flag::register(SIGTERM, interrupted.clone())?;

    smol::block_on(async {
        let runtime = Arc::new(LuixRuntime::new(Arc::new(SmolSpawner)));
        let auto_expose = config.provider.auto_expose;
        let exporter = ProviderExporter::new(runtime.clone(), config)?;

        if auto_expose {
            let url = exporter
                .export(echo_service(), args.form.as_deref(), args.version.as_deref())
                .await?;
            info!("Serving {} at {}", ECHO_SERVICE, url.address());
        } else {
            info!("auto_expose is disabled, nothing to serve");
        }

        while !interrupted.load(Ordering::Relaxed) {
            smol::Timer::after(Duration::from_millis(200)).await;
        }

        info!("Shutting down");
        exporter.unexport_all().await?;
        runtime.registries().close_all();
        Ok::<(), anyhow::Error>(())
    })
}
