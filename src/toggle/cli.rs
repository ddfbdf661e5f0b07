use crate::toggle::toggler::Toggler;
use crate::toggle::{build_info, config, engine, telemetry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "pproftoggle", version, about = "on-demand diagnostic endpoint")]
pub struct Args {
    /// Path to the toggler config YAML
    #[arg(short = 'c', long = "config", default_value = "pproftoggle.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub cmd: Option<Cmd>,
}

#[derive(Debug, Subcommand)]
pub enum Cmd {
    /// Serve until SIGINT/SIGTERM (default). SIGUSR1 forces the endpoint up, SIGUSR2 forces it down.
    Run,
    /// Evaluate the configured rules once and report the result
    Check,
}

pub async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = config::load_config(&args.config)?;

    match args.cmd.unwrap_or(Cmd::Run) {
        Cmd::Run => serve(cfg).await,
        Cmd::Check => check(&cfg),
    }
}

async fn serve(cfg: config::FileConfig) -> anyhow::Result<()> {
    eprintln!("{}", build_info::banner());
    telemetry::initialise(&cfg.logging)?;

    let toggler = Arc::new(Toggler::new(cfg.toggler_config())?);
    let cancel = CancellationToken::new();
    start_signal_listener(Arc::clone(&toggler), cancel.clone())?;

    toggler.serve(cancel).await?;
    Ok(())
}

fn check(cfg: &config::FileConfig) -> anyhow::Result<()> {
    let toggler_cfg = cfg.toggler_config();
    let ev = engine::evaluate(&toggler_cfg.rules)?;
    println!("matched: {}", ev.matched);
    for name in ev.triggering_names() {
        println!("  triggered by: {name}");
    }
    Ok(())
}

#[cfg(unix)]
fn start_signal_listener(toggler: Arc<Toggler>, cancel: CancellationToken) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = term.recv() => break,
                _ = int.recv() => break,
                _ = usr1.recv() => toggler.force_start(),
                _ = usr2.recv() => toggler.force_stop(),
                () = cancel.cancelled() => return,
            }
        }
        cancel.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn start_signal_listener(_toggler: Arc<Toggler>, cancel: CancellationToken) -> anyhow::Result<()> {
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel.cancel();
    });
    Ok(())
}
