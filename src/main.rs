use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use castlink::config::{default_config_path, load_config, Config};
use castlink::{discovery, CastManager, SenderHandle, SenderOptions};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "castlink")]
#[command(about = "Control Cast devices over a shared connection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: error, warn, info, debug or trace
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List Cast devices on the local network
    Discover {
        /// How long to browse for advertisements
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Connect to a device and execute JSON command lines from stdin
    Run {
        /// Device host or IP address
        #[arg(long)]
        host: Option<String>,

        /// Device port
        #[arg(long)]
        port: Option<u16>,

        /// Friendly device name, resolved over mDNS when no host is given
        #[arg(long)]
        name: Option<String>,

        /// Receiver applications this sender binds to (comma separated)
        #[arg(long, value_delimiter = ',')]
        apps: Option<Vec<String>>,
    },
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn init_logging(level: &str) {
    let filter = log::LevelFilter::from_str(level.trim());
    let mut clog = colog::default_builder();
    clog.filter(None, *filter.as_ref().unwrap_or(&log::LevelFilter::Info));
    clog.init();
    if filter.is_err() {
        warn!("Unknown log level '{}', using info", level);
    }

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!(
            "panic in thread '{}': {}",
            thread_name,
            panic_payload_to_string(panic_info.payload())
        );
    }));
}

fn load(path: Option<PathBuf>) -> Result<Config, Box<dyn std::error::Error>> {
    match path.or_else(default_config_path) {
        Some(path) => Ok(load_config(&path)?),
        None => Ok(Config::default()),
    }
}

fn print_line(value: &Value) {
    println!("{}", value);
}

async fn discover(config: &Config, timeout_ms: Option<u64>) {
    let timeout = Duration::from_millis(timeout_ms.unwrap_or(config.discovery.timeout_ms));
    let devices = discovery::discover(timeout).await;
    if devices.is_empty() {
        info!("No cast devices found within {} ms", timeout.as_millis());
    }
    for device in devices {
        print_line(&json!(device));
    }
}

async fn execute_line(sender: &SenderHandle, line: &str) {
    let payload: Value = match serde_json::from_str(line) {
        Ok(payload) => payload,
        Err(err) => {
            print_line(&json!({"error": format!("invalid JSON: {}", err)}));
            return;
        }
    };
    match sender.dispatch(&payload).await {
        Ok(report) => print_line(&json!({"ok": report})),
        Err(err) => print_line(&json!({"error": err.to_string()})),
    }
}

async fn run(config: Config, apps: Option<Vec<String>>) -> Result<(), Box<dyn std::error::Error>> {
    info!("Controlling {}", config.device_target());
    let manager = CastManager::with_castv2(config);
    let mut sender = manager.register(SenderOptions {
        applications: apps,
        accept_generic: None,
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => execute_line(&sender, line.trim()).await,
                None => break,
            },
            notification = sender.next_notification() => match notification {
                Some(notification) => print_line(&json!({"notification": notification})),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = load(cli.config)?;
    let level = cli
        .log_level
        .unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level);

    match cli.command {
        Commands::Discover { timeout_ms } => discover(&config, timeout_ms).await,
        Commands::Run {
            host,
            port,
            name,
            apps,
        } => {
            if let Some(host) = host {
                config.device.host = host;
            }
            if let Some(port) = port {
                config.device.port = port;
            }
            if let Some(name) = name {
                config.device.name = name;
            }
            if config.device_target().needs_discovery() && config.device.name.trim().is_empty() {
                return Err(
                    "either --host or --name (or [device] in the config) is required".into(),
                );
            }
            run(config, apps).await?;
        }
    }
    Ok(())
}
