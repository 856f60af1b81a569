use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tonefleet_core::config::DEFAULT_CONFIG_FILE;
use tonefleet_core::{load_sequence, AppConfig, Performance, Playlist, ToneFleetError};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Play(args) => run_play(&args),
        Commands::Check(args) => run_check(&args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run_play(args: &SessionArgs) -> tonefleet_core::Result<()> {
    print_banner();
    let (config, playlist) = load(args)?;
    let performance = Performance::new(&config, &playlist);
    perform(&config, performance)?;
    print_banner();
    Ok(())
}

#[cfg(feature = "ssh")]
fn perform(config: &AppConfig, performance: Performance) -> tonefleet_core::Result<()> {
    use std::sync::Arc;

    use tonefleet_core::{DebugSink, SshConnector};

    tracing::info!(known_hosts = %config.known_hosts.display(), "using known_hosts file");
    if !config.known_hosts.is_file() {
        return Err(ToneFleetError::msg(format!(
            "failed to load known_hosts: {} is not a file",
            config.known_hosts.display()
        )));
    }
    let connector = Arc::new(SshConnector::new(&config.known_hosts));

    let (debug, sink) = DebugSink::spawn(std::io::stdout(), 2 * config.targets.len())?;
    performance.run(connector, &debug)?;
    drop(debug);
    sink.join()
}

#[cfg(not(feature = "ssh"))]
fn perform(_config: &AppConfig, _performance: Performance) -> tonefleet_core::Result<()> {
    Err(ToneFleetError::msg(
        "this build has no SSH support; rebuild with the `ssh` feature",
    ))
}

fn run_check(args: &SessionArgs) -> tonefleet_core::Result<()> {
    let (config, playlist) = load(args)?;
    let performance = Performance::new(&config, &playlist);
    let report = serde_json::json!({
        "config": config,
        "total_duration": playlist.total_duration(),
        "targets": performance.summary(),
    });
    let text = serde_json::to_string_pretty(&report)
        .map_err(|err| ToneFleetError::msg(err.to_string()))?;
    println!("{text}");
    Ok(())
}

fn load(args: &SessionArgs) -> tonefleet_core::Result<(AppConfig, Playlist)> {
    tracing::info!(path = %args.conf.display(), "loading configuration");
    let config = AppConfig::from_file(&args.conf).map_err(|err| {
        ToneFleetError::msg(format!("failed to load {}: {err}", args.conf.display()))
    })?;

    let mut playlist = Playlist::new();
    for file in &args.files {
        let duration = playlist.push(load_sequence(file)?);
        tracing::info!(file = %file.display(), ?duration, "loaded song");
    }
    tracing::info!(songs = playlist.len(), total = ?playlist.total_duration(), "playlist ready");
    Ok((config, playlist))
}

fn print_banner() {
    println!("==================================");
    println!("  ToneFleet {}", env!("CARGO_PKG_VERSION"));
    println!("==================================");
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Synchronized MIDI playback across beepers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to every configured device and play the songs together.
    Play(SessionArgs),
    /// Load the configuration and songs, then print the plan without connecting.
    Check(SessionArgs),
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Configuration file describing the devices.
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    conf: PathBuf,
    /// MIDI files to play, in order.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}
