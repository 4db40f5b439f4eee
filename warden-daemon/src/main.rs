use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use warden_daemon::config::DaemonConfig;
use warden_daemon::errors::DaemonError;
use warden_daemon::supervisor::Supervisor;
use warden_daemon::worker::CommandLauncher;

/// Warden daemon - keeps the server/proxy worker pair alive
#[derive(Parser)]
#[command(name = "warden-daemon", about = "Heartbeat supervisor for the warden worker pair")]
struct Args {
    /// YAML config file; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = DaemonConfig::load_or_default(args.config.as_deref())?;
    if args.print_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    warden_daemon::init_tracing();
    info!("Starting warden daemon");

    let launcher = CommandLauncher::from_config(&config)?;
    let mut supervisor = Supervisor::bind(&config, launcher)?;

    let outcome = tokio::select! {
        result = async {
            supervisor.start().await?;
            supervisor.run().await;
            Ok::<(), DaemonError>(())
        } => result,
        _ = warden_daemon::shutdown_signal() => Ok(()),
    };

    supervisor.shutdown().await;
    outcome?;
    info!("Warden daemon stopped");
    Ok(())
}
