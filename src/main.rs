//! Polyglot CLI entry point.
//!
//! Loads the configuration, wires the native runtime and the standard bridge
//! functions into an orchestrator, runs one command and shuts down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use polyglot_common::{Config, LoggingConfig, Value};
use polyglot_core::{Context, Orchestrator};
use polyglot_host::{LogBuffer, NativeLibrary, native_runtime, register_all};

#[derive(Parser)]
#[command(name = "polyglot")]
#[command(about = "Run code across language runtimes hosted in one process", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "POLYGLOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Deadline for the command, in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered runtimes
    Runtimes,

    /// Call a function in a runtime
    Call {
        runtime: String,
        function: String,
        /// Arguments, parsed as JSON when possible
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Execute code in a runtime
    Execute {
        runtime: String,
        code: String,
        /// Arguments, parsed as JSON when possible
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Call a bridge function
    Bridge {
        function: String,
        /// Arguments, parsed as JSON when possible
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging);
    info!(app = %config.app.name, version = %config.app.version, "Starting polyglot");

    let orchestrator = Orchestrator::new(config);
    let logs = Arc::new(LogBuffer::new());
    register_all(
        &orchestrator.bridge_instance(),
        orchestrator.memory(),
        logs.clone(),
    )
    .context("Failed to register bridge functions")?;
    orchestrator
        .register_runtime(Arc::new(native_runtime(NativeLibrary::with_builtins())))
        .context("Failed to register native runtime")?;

    let root = Context::background();
    let interrupt = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    orchestrator
        .initialize(&root)
        .await
        .context("Failed to initialize runtimes")?;

    let ctx = match cli.timeout_ms {
        Some(ms) => root.with_timeout(Duration::from_millis(ms)),
        None => root.child(),
    };
    let outcome = run(&orchestrator, &ctx, cli.command).await;

    // Shut down even if the command failed.
    let shutdown = orchestrator.shutdown(&Context::background()).await;
    debug!(guest_logs = logs.len(), "\n{}", orchestrator.profiler().report());

    let output = outcome?;
    shutdown.context("Shutdown failed")?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(
    orchestrator: &Orchestrator,
    ctx: &Context,
    command: Command,
) -> anyhow::Result<serde_json::Value> {
    let result = match command {
        Command::Runtimes => return Ok(list_runtimes(orchestrator)),
        Command::Call {
            runtime,
            function,
            args,
        } => orchestrator
            .call(ctx, &runtime, &function, &parse_args(&args))
            .await
            .with_context(|| format!("{runtime}.{function} failed"))?,
        Command::Execute {
            runtime,
            code,
            args,
        } => orchestrator
            .execute(ctx, &runtime, &code, &parse_args(&args))
            .await
            .with_context(|| format!("execute in {runtime} failed"))?,
        Command::Bridge { function, args } => orchestrator
            .bridge_instance()
            .call(ctx, &function, &parse_args(&args))
            .await
            .with_context(|| format!("bridge function {function} failed"))?,
    };

    Ok(result.into())
}

fn list_runtimes(orchestrator: &Orchestrator) -> serde_json::Value {
    let config = orchestrator.config();
    orchestrator
        .runtimes()
        .into_iter()
        .filter_map(|name| {
            let runtime = orchestrator.runtime(&name)?;
            let enabled = config.runtime_config(&name).is_none_or(|cfg| cfg.enabled);
            Some(serde_json::json!({
                "name": name,
                "version": runtime.version(),
                "enabled": enabled,
                "state": runtime.state().to_string(),
            }))
        })
        .collect()
}

/// Parse each argument as JSON, falling back to a plain string.
fn parse_args(args: &[String]) -> Vec<Value> {
    args.iter()
        .map(|arg| {
            serde_json::from_str::<serde_json::Value>(arg)
                .map_or_else(|_| Value::from(arg.as_str()), Value::from)
        })
        .collect()
}

/// Filter built from `[logging] level` alone.
fn config_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::new(&logging.level)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| config_filter(logging));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries the command result.
    if logging.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
