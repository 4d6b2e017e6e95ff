use std::{
    process::exit,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context;
use clap::Parser;
use exercism_orchestrator::{
    backend::connect_backend,
    config::ServiceConfig,
    runner::RunnerService,
    server::{serve, AppState},
    smoke::{run_smoke_test, SmokeTestConfig},
};
use once_cell::sync::Lazy;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

mod opt;

static CTRL_C: AtomicBool = AtomicBool::new(false);
static SHUTDOWN: Lazy<Arc<Notify>> = Lazy::new(|| Arc::new(Notify::new()));

fn main() -> anyhow::Result<()> {
    let opts = opt::Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match opts.cmd {
        opt::SubCmd::Serve(cmd) => {
            let mut cfg = ServiceConfig::load(cmd.config.as_deref())
                .context("Failed to load configuration")?;
            if let Some(bind) = cmd.bind {
                cfg.bind = bind;
            }
            if let Some(workers) = cmd.workers {
                cfg.workers = workers;
            }

            ctrlc::set_handler(handle_ctrl_c).context("Failed to set termination handler")?;
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(cfg.workers.max(1))
                .enable_all()
                .build()?
                .block_on(server(cfg))
        }
        opt::SubCmd::Smoke(cmd) => tokio::runtime::Runtime::new()?.block_on(smoke(cmd)),
    }
}

async fn server(cfg: ServiceConfig) -> anyhow::Result<()> {
    let cfg = Arc::new(cfg);
    let backend = connect_backend(&cfg).await;
    tracing::info!(
        backend = backend.kind().as_str(),
        workers = cfg.workers,
        "Job backend initialized"
    );
    let runner = Arc::new(RunnerService::new(backend, cfg.clone()));

    let shutdown = SHUTDOWN.clone();
    serve(AppState::new(cfg, runner), async move {
        shutdown.notified().await
    })
    .await
}

async fn smoke(cmd: opt::SmokeSubCmd) -> anyhow::Result<()> {
    let cfg = SmokeTestConfig {
        host: cmd.host,
        language: cmd.language,
        code_file: cmd.code_file,
        test_config: cmd.test_config,
    };
    for res in run_smoke_test(&cfg).await? {
        println!("{}", res);
        println!();
    }
    Ok(())
}

fn handle_ctrl_c() {
    if !CTRL_C.swap(true, Ordering::SeqCst) {
        tracing::warn!("Waiting for running test jobs to complete... Press Ctrl-C again to force quit.");
        SHUTDOWN.notify_one();
    } else {
        tracing::error!("Force quit!");
        exit(101);
    }
}
