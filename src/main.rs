//! Binary entrypoint for the smsfwd CLI.
//!
//! Commands:
//! - `start [--port <path>]` - run the forwarder on the configured (or given) modem
//! - `init` - write a starter configuration file
//! - `check` - load and validate the configuration, print the rule table
//! - `smoketest --port <path> [-b <baud>]` - probe a modem and print a JSON summary
//!
//! See the library crate docs for module‑level details: `smsfwd::`.
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};

use smsfwd::config::Config;
use smsfwd::rules::RuleSet;

#[derive(Parser)]
#[command(name = "smsfwd")]
#[command(about = "Forward SMS received on a GSM modem to other numbers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Transmission log file (overrides logging.transmission_file)
    #[arg(short, long, global = true)]
    logfile: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start forwarding
    Start {
        /// Modem serial port (e.g., /dev/ttyUSB0)
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Validate the configuration and show the rule table
    Check,
    /// Open a modem, identify it and count stored messages
    SmokeTest {
        /// Modem serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            init_logging(&None, cli.verbose);
            if std::path::Path::new(&cli.config).exists() {
                error!("Refusing to overwrite existing {}", cli.config);
                std::process::exit(1);
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Check => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            let rules = RuleSet::from_config(&config.rules);
            println!("{}: {} rule(s)", cli.config, rules.len());
            for rule in rules.iter() {
                let targets = if rule.targets().is_empty() {
                    "(none)".to_string()
                } else {
                    rule.targets().join(", ")
                };
                println!("  {} -> {}", rule.pattern(), targets);
            }
            println!(
                "modem {} @ {} baud, storage {}",
                config.modem.port, config.modem.baud_rate, config.modem.storage
            );
        }
        Commands::Start { port } => {
            let mut config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting smsfwd v{}", env!("CARGO_PKG_VERSION"));
            // CLI overrides config
            if let Some(port) = port {
                config.modem.port = port;
            }
            if let Some(file) = cli.logfile {
                config.logging.transmission_file = Some(file);
            }
            run_forwarder(config).await?;
        }
        Commands::SmokeTest { port, baud } => {
            let mut config = Config::load(&cli.config).await.unwrap_or_default();
            init_logging(&Some(config.clone()), cli.verbose);
            config.modem.port = port;
            config.modem.baud_rate = baud;
            smoke_test(config).await?;
        }
    }

    Ok(())
}

#[cfg(feature = "serial")]
async fn run_forwarder(config: Config) -> Result<()> {
    use smsfwd::activity::TransmissionLog;
    use smsfwd::forwarder::{EngineTuning, ForwardingEngine};
    use smsfwd::modem::AtModem;

    let modem = AtModem::open(&config.modem)
        .await
        .with_context(|| format!("Cannot open GSM modem on {}", config.modem.port))?;
    info!("Connected to GSM modem on {}", modem.port_name());

    let rules = Arc::new(RuleSet::from_config(&config.rules));
    let activity = TransmissionLog::new(config.logging.transmission_file.clone().map(Into::into));
    let mut engine = ForwardingEngine::new(rules, modem, activity, EngineTuning::from(&config.forwarding));

    let interrupted = tokio::select! {
        result = engine.run() => {
            result.context("Forwarding stopped")?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        info!("Interrupted, shutting down ({})", engine.stats().summary());
    }
    Ok(())
}

#[cfg(not(feature = "serial"))]
async fn run_forwarder(_config: Config) -> Result<()> {
    error!("Forwarding requires the 'serial' feature");
    std::process::exit(2);
}

#[cfg(feature = "serial")]
async fn smoke_test(config: Config) -> Result<()> {
    use smsfwd::modem::AtModem;
    use smsfwd::transport::Transport;

    info!(
        "Starting smoke test on {} @ {} baud",
        config.modem.port, config.modem.baud_rate
    );
    let mut modem = AtModem::open(&config.modem)
        .await
        .with_context(|| format!("Cannot open GSM modem on {}", config.modem.port))?;
    let identity = modem.identify_device().await;
    let pending = modem.list_pending().await;
    let status_ok = identity.is_ok() && pending.is_ok();
    let payload = serde_json::json!({
        "status": if status_ok { "ok" } else { "incomplete" },
        "port": modem.port_name(),
        "product": identity.as_ref().ok().map(|i| i.product_name.clone()),
        "serial": identity.as_ref().ok().map(|i| i.serial_number.clone()),
        "pending": pending.as_ref().ok().map(|p| p.len()),
        "error": identity.err().or(pending.err()).map(|e| e.to_string()),
    });
    println!("{}", payload);
    std::process::exit(if status_ok { 0 } else { 1 });
}

#[cfg(not(feature = "serial"))]
async fn smoke_test(_config: Config) -> Result<()> {
    error!("SmokeTest requires the 'serial' feature");
    std::process::exit(2);
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides config
    let configured = config
        .as_ref()
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = Arc::new(std::sync::Mutex::new(f));
        // Without a terminal (service mode) the file is the only sink
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
