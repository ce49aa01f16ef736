//! Binary entrypoint for the Scantrack CLI.
//!
//! Commands:
//! - `start` - run the station server against the configured scanner ports
//! - `init` - create a starter `config.toml` and seed the indirect-work master
//! - `status` - print the current configuration and port summary
//! - `smoke-test --port <path> [-b <baud>] [--timeout <s>]` - probe a scanner link
//!
//! See the library crate docs for module-level details: `scantrack::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use scantrack::config::Config;
use scantrack::station::StationServer;
use scantrack::storage::{IndirectWork, SledRecordStore};

#[derive(Parser)]
#[command(name = "scantrack")]
#[command(about = "Work-session tracking for barcode/QR scan stations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the station server
    Start,
    /// Initialize a new configuration and seed master data
    Init,
    /// Show configuration and port status
    Status,
    /// Run a serial smoke test: read and classify frames for a while
    SmokeTest {
        /// Scanner serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 9600)]
        baud: u32,
        /// Seconds to listen before reporting
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early to configure logging (except for Init which writes it later)
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start => {
            let config = pre_config.unwrap_or(Config::load(&cli.config).await?);
            info!("Starting Scantrack v{}", env!("CARGO_PKG_VERSION"));
            let mut server = StationServer::new(config).await?;
            server.run().await?;
        }
        Commands::Init => {
            info!("Initializing new station configuration");
            let config = Config::default();
            let serialized = toml::to_string_pretty(&config)?;
            tokio::fs::write(&cli.config, serialized).await?;
            info!("Configuration file created at {}", cli.config);

            // Seed a small indirect-work master so stations work out of the box.
            let store = SledRecordStore::open(format!("{}/records", config.storage.data_dir))
                .map_err(|e| anyhow::anyhow!("failed to open record store: {}", e))?;
            let defaults = vec![
                ("A01", "morning meeting", "MEET  "),
                ("A02", "5S cleanup", "CLEAN "),
                ("A03", "equipment maintenance", "MAINT "),
            ];
            for (code, status_label, display_label) in defaults {
                store
                    .seed_indirect_work(
                        code,
                        &IndirectWork {
                            status_label: status_label.to_string(),
                            display_label: display_label.to_string(),
                        },
                    )
                    .map_err(|e| anyhow::anyhow!("failed to seed {}: {}", code, e))?;
            }
            info!(
                "Initialized record store at {}/records",
                config.storage.data_dir
            );
        }
        Commands::Status => {
            let config = pre_config.unwrap_or(Config::load(&cli.config).await?);
            let server = StationServer::new(config).await?;
            server.show_status().await?;
        }
        Commands::SmokeTest {
            port,
            baud,
            timeout,
        } => {
            #[cfg(not(feature = "serial"))]
            {
                let _ = (port, baud, timeout);
                eprintln!("SmokeTest requires the 'serial' feature");
                std::process::exit(2);
            }
            #[cfg(feature = "serial")]
            {
                smoke_test(&port, baud, timeout)?;
            }
        }
    }

    Ok(())
}

/// Listen on a scanner port and report what arrived, as JSON.
#[cfg(feature = "serial")]
fn smoke_test(port: &str, baud: u32, timeout: u64) -> Result<()> {
    use scantrack::config::PortConfig;
    use scantrack::qr::{self, QrKind};
    use scantrack::serial::FrameBuffer;
    use std::io::Read;
    use std::time::{Duration, Instant};

    let cfg = PortConfig {
        device: port.to_string(),
        baud_rate: baud,
        data_bits: 8,
        parity: "N".to_string(),
        stop_bits: 1,
        timeout_ms: 500,
        enable: true,
        default_worker: None,
        default_process: None,
        factory_code: None,
    };
    let mut link = scantrack::serial::open_link(&cfg)?;
    info!("Starting smoke test on {} @ {} baud", port, baud);

    let deadline = Instant::now() + Duration::from_secs(timeout);
    let mut buffer = FrameBuffer::new();
    let mut chunk = [0u8; 512];
    let mut frames = 0u32;
    let mut instructions = 0u32;
    let mut workers = 0u32;
    let mut other = 0u32;

    while Instant::now() < deadline {
        match link.read(&mut chunk) {
            Ok(0) => std::thread::sleep(Duration::from_millis(40)),
            Ok(n) => {
                buffer.push_chunk(&chunk[..n]);
                while let Some(line) = buffer.next_frame() {
                    frames += 1;
                    match qr::classify(&line, None) {
                        QrKind::Instruction(_) => instructions += 1,
                        QrKind::WorkerCode(_) => workers += 1,
                        _ => other += 1,
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!("read error during smoke test: {}", e);
                break;
            }
        }
    }

    let payload = serde_json::json!({
        "status": if frames > 0 { "ok" } else { "silent" },
        "frames": frames,
        "instructions": instructions,
        "workers": workers,
        "other": other,
        "timeout_seconds": timeout,
    });
    println!("{}", payload);
    std::process::exit(if frames > 0 { 0 } else { 1 });
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity overrides config
    let base_level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    if let Some(cfg) = config {
        if verbosity == 0 {
            if let Ok(level) = cfg.logging.level.parse::<log::LevelFilter>() {
                builder.filter_level(level);
            }
        }
        if let Some(ref file) = cfg.logging.file {
            if let Ok(f) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
            {
                let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

                // If stdout is a terminal, mirror log lines to the console too.
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
                    writeln!(
                        fmt,
                        "{} [{}] {}",
                        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                        record.level(),
                        record.args()
                    )
                });
            }
        } else {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
