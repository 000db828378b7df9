//! Squat Coach CLI
//!
//! Real-time squat coaching from insole pressure and posture inference.

use clap::{Parser, Subcommand};
use squat_coach::{config::Config, PhrasePool, VERSION};
use std::net::IpAddr;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "squat-coach")]
#[command(version = VERSION)]
#[command(about = "Real-time squat coaching server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coaching server
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(long, short)]
        port: Option<u16>,

        /// Address to bind to (overrides the config file)
        #[arg(long)]
        host: Option<IpAddr>,
    },

    /// Show configuration
    Config,

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List the built-in coaching phrases
    Phrases,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { port, host } => cmd_serve(port, host),
        Commands::Config => {
            cmd_config();
            Ok(())
        }
        Commands::InitConfig { force } => cmd_init_config(force),
        Commands::Phrases => {
            cmd_phrases();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("squat_coach=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(feature = "server")]
fn cmd_serve(port: Option<u16>, host: Option<IpAddr>) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(host) = host {
        config.host = host;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let (addr, shutdown_tx) = squat_coach::server::run(config).await?;
        println!("Squat coach v{VERSION} listening on http://{addr}");
        println!("Press Ctrl+C to stop.");

        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
        let _ = shutdown_tx.send(());
        // Let the scheduler loops observe cancellation
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        Ok::<(), anyhow::Error>(())
    })
}

#[cfg(not(feature = "server"))]
fn cmd_serve(_port: Option<u16>, _host: Option<IpAddr>) -> anyhow::Result<()> {
    anyhow::bail!("built without the `server` feature")
}

fn cmd_config() {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: {e}, showing defaults");
        Config::default()
    });

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn cmd_init_config(force: bool) -> anyhow::Result<()> {
    let path = Config::config_path();
    if path.exists() && !force {
        anyhow::bail!("{path:?} already exists (use --force to overwrite)");
    }
    Config::default().save()?;
    println!("Wrote default configuration to {path:?}");
    Ok(())
}

fn cmd_phrases() {
    println!("Encouragement:");
    for phrase in PhrasePool::encouragement().iter() {
        println!("  - {phrase}");
    }
    println!();
    println!("All good:");
    for phrase in squat_coach::feedback::phrases::ALL_GOOD {
        println!("  - {phrase}");
    }
}
