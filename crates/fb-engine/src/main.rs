use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use fb_config::BenchConfig;
use fb_core::value::{Value, ValueType};
use fb_modules::{ValueGenConfig, delayer, probe, value_gen};
use fb_runtime::tracing_init::init_tracing;
use fb_runtime::{Engine, wait_for_signal};

#[derive(Parser)]
#[command(name = "flowbench", about = "FlowBench dataflow runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the FlowBench engine
    Run {
        /// Path to the flowbench.toml config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Wire and run a small demo pipeline, then exit
        #[arg(long)]
        demo: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, demo } => {
            let (bench_config, base_dir) = match config {
                Some(path) => {
                    let path = path
                        .canonicalize()
                        .map_err(|e| anyhow::anyhow!("config path '{}': {e}", path.display()))?;
                    let base = path
                        .parent()
                        .expect("config path must have a parent directory")
                        .to_path_buf();
                    (BenchConfig::load(&path)?, base)
                }
                None => (BenchConfig::default(), std::env::current_dir()?),
            };

            let _guard = init_tracing(&bench_config.logging, &base_dir)?;

            let engine = Engine::start(bench_config)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            tracing::info!(target: "fb::sys", "FlowBench engine started");

            if demo {
                run_demo(&engine).await?;
                engine.wait().await.map_err(|e| anyhow::anyhow!("{e}"))?;
                return Ok(());
            }

            let cancel = CancellationToken::new();
            wait_for_signal(cancel).await;
            engine.shutdown().await;
            match engine.wait().await {
                Ok(()) => Ok(()),
                // A signal-initiated shutdown drains through the
                // cancellation path; that is the expected exit.
                Err(e) if e.to_string().contains("cancelled") => Ok(()),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }
    }
}

/// Wire gen → delay → probe, emit ten values and print what arrived.
async fn run_demo(engine: &Engine) -> Result<()> {
    let host = engine.host();
    let values: Vec<Value> = (0..10).map(Value::Int64).collect();

    let generator = value_gen(
        &host,
        "demo-gen",
        ValueType::Int64,
        ValueGenConfig {
            values,
            interval: Duration::from_millis(50),
            ..ValueGenConfig::default()
        },
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;
    let relay = delayer(&host, "demo-relay", ValueType::Int64, Duration::from_millis(10))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let (sink, observed) = probe(&host, "demo-sink", ValueType::Int64, Duration::ZERO)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let dispatcher = engine.dispatcher();
    dispatcher
        .bind(
            generator.out_port("data").unwrap(),
            relay.in_port("in").unwrap(),
        )
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    dispatcher
        .bind(relay.out_port("out").unwrap(), sink.in_port("in").unwrap())
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    generator
        .run_module(false)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    engine
        .scheduler()
        .wait_all()
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    tracing::info!(
        target: "fb::sys",
        received = observed.len(),
        "demo pipeline finished"
    );
    for (value, attr) in observed.records() {
        println!("#{} {value:?}", attr.index());
    }
    Ok(())
}
