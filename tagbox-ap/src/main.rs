//! TagBox appliance (tagbox-ap) - host entry point
//!
//! Boots the appliance core against simulated peripherals, with a host
//! directory standing in for the removable medium. Tags and buttons are
//! driven from stdin, one command per line.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tagbox_ap::bus::boot::BootSequence;
use tagbox_ap::config::TomlConfig;
use tagbox_ap::control::{Appliance, Command};
use tagbox_ap::playback::PlaybackController;
use tagbox_ap::scheduler::{ControlContext, ControlTask, FeedingContext};
use tagbox_ap::sim::SimHardware;
use tagbox_ap::storage::fs::FsMedium;
use tagbox_ap::storage::library::Library;
use tagbox_ap::storage::Medium;
use tagbox_ap::tag::{TagPresenceMonitor, TagRead};
use tagbox_common::config::{locate_config_file, resolve_library_root};

/// Tag reader reset pulse at boot
const TAG_RESET_PULSE: Duration = Duration::from_millis(10);

/// How long `--test-tone` plays before normal operation starts
const TEST_TONE_DURATION: Duration = Duration::from_secs(1);

/// Command-line arguments for tagbox-ap
#[derive(Parser, Debug)]
#[command(name = "tagbox-ap")]
#[command(about = "NFC tag music appliance (host simulation)")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory standing in for the removable medium (contains Music/)
    #[arg(short, long)]
    library: Option<PathBuf>,

    /// Volume at boot (0-100), overrides the config file
    #[arg(long)]
    volume: Option<u8>,

    /// Play a decoder sine test tone near this frequency at boot
    #[arg(long, value_name = "HZ")]
    test_tone: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = locate_config_file(args.config.as_deref());
    let config =
        TomlConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    let level = config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tagbox_ap={},tagbox_common={}", level, level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting tagbox-ap {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("TAGBOX_BUILD_ID")
    );
    if let Some(path) = &config_path {
        info!("Configuration: {}", path.display());
    }

    let library_root = resolve_library_root(args.library.as_deref(), config.library_root.as_deref());
    if !library_root.is_dir() {
        return Err(tagbox_ap::Error::LibraryRoot(library_root).into());
    }
    info!("Library root: {}", library_root.display());

    // Boot the shared bus peripherals
    let hw = SimHardware::with_rearm_settle(config.storage.rearm_settle());
    let mut decoder = hw.vs1053(config.decoder.clone());
    let mut screen = hw.status_screen();
    let mut tag_reset = hw.tag_reset.clone();
    let mut boot_reader = hw.tag_reader.clone();

    let report = BootSequence {
        bus: &hw.bus,
        tag_reset: &mut tag_reset,
        tag_reader: &mut boot_reader,
        decoder: &mut decoder,
        display: &mut screen,
        reset_pulse: TAG_RESET_PULSE,
    }
    .run()
    .context("Boot failed")?;
    info!(
        "Decoder version {}, display {}",
        report.decoder.version(),
        if report.display_ok { "ok" } else { "unavailable" }
    );

    let volume = decoder.volume_control();
    let level = args.volume.unwrap_or(config.playback.default_volume);
    volume.set_volume(level).context("Failed to set initial volume")?;

    if let Some(freq) = args.test_tone {
        decoder.play_test_tone(freq).context("Test tone failed")?;
        tokio::time::sleep(TEST_TONE_DURATION).await;
        decoder.stop_playback().context("Failed to end test tone")?;
    }

    // Medium and library
    let fs_medium = Arc::new(FsMedium::new(&library_root));
    let medium: Arc<dyn Medium> = fs_medium.clone();
    let mut storage = hw.storage_on(Arc::clone(&medium));
    match storage.begin() {
        Ok(info) => info!("Medium mounted ({} bytes)", info.capacity_bytes),
        Err(e) => warn!("Medium not ready: {}", e),
    }
    let library = Library::new(Arc::clone(&hw.bus), medium);
    match library.list_albums() {
        Ok(albums) => info!("{} albums: {}", albums.len(), albums.join(", ")),
        Err(e) => warn!("Cannot list albums: {}", e),
    }

    // Feeding context
    let controller = PlaybackController::new(storage, Box::new(decoder), &config.playback);
    let feeder = FeedingContext::spawn(controller, config.playback.idle_sleep())
        .context("Failed to start feeding context")?;

    // Control context
    let appliance = Appliance::new(
        Arc::clone(&hw.bus),
        feeder.handle(),
        volume,
        library,
        Box::new(hw.tag_reader.clone()),
        TagPresenceMonitor::new(config.control.tag_present_reads, config.control.tag_absent_reads),
        config.playback.loop_album,
    )
    .with_screen(screen);
    let (requests, inbox) = mpsc::unbounded_channel();
    let control = ControlContext::new(Console { appliance, inbox }, config.control.tick())
        .spawn()
        .context("Failed to start control context")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Ready; type 'help' for commands");
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !console_command(line.trim(), &hw, &fs_medium, &requests).await {
                        break;
                    }
                }
                Ok(None) => {
                    info!("stdin closed; running until signalled");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    let console = tokio::task::spawn_blocking(move || control.shutdown())
        .await
        .context("Control context join failed")?
        .context("Control context shutdown failed")?;
    let mut appliance = console.appliance;
    appliance.stop();
    feeder.shutdown().context("Feeding context shutdown failed")?;
    info!("Shutdown complete");
    Ok(())
}

/// Request from the console to the control thread
enum ConsoleRequest {
    Command(Command),
    Status(oneshot::Sender<serde_json::Value>),
}

/// The appliance plus the console inbox, drained once per control tick
struct Console {
    appliance: Appliance,
    inbox: mpsc::UnboundedReceiver<ConsoleRequest>,
}

impl ControlTask for Console {
    fn tick(&mut self) -> tagbox_ap::Result<()> {
        while let Ok(request) = self.inbox.try_recv() {
            match request {
                ConsoleRequest::Command(command) => {
                    if let Err(e) = self.appliance.handle_command(command) {
                        warn!("{}", e);
                    }
                }
                ConsoleRequest::Status(reply) => {
                    let appliance = &self.appliance;
                    let status = serde_json::json!({
                        "album": appliance.album(),
                        "position": appliance.queue().map(|q| q.position()),
                        "player": appliance.snapshot(),
                    });
                    // Receiver gone means the console stopped waiting
                    let _ = reply.send(status);
                }
            }
        }
        self.appliance.tick()
    }
}

/// Handle one console line; false means quit
async fn console_command(
    line: &str,
    hw: &SimHardware,
    medium: &FsMedium,
    requests: &mpsc::UnboundedSender<ConsoleRequest>,
) -> bool {
    let (verb, arg) = line.split_once(' ').unwrap_or((line, ""));
    let request = match verb {
        "" => return true,
        "quit" | "exit" => return false,
        "help" => {
            println!(
                "tag <album> | remove | eject | insert | album <name> | pause | resume | stop | \
                 next | prev | vol <0-100|+|-> | status | quit"
            );
            return true;
        }
        "tag" => {
            let text = arg.trim().to_string();
            hw.tag_reader.present(TagRead {
                uid: text.bytes().take(7).collect(),
                text: Some(text),
            });
            return true;
        }
        "remove" => {
            hw.tag_reader.remove();
            return true;
        }
        "eject" => {
            medium.eject();
            return true;
        }
        "insert" => {
            medium.insert();
            return true;
        }
        "status" => {
            let (reply, status) = oneshot::channel();
            if requests.send(ConsoleRequest::Status(reply)).is_err() {
                warn!("Control context is gone");
                return false;
            }
            match status.await {
                Ok(mut status) => {
                    let stats = hw.bus.stats();
                    status["bus"] = serde_json::json!({
                        "transactions": stats.transactions,
                        "rearms": stats.rearms,
                    });
                    println!("{}", status);
                }
                Err(_) => warn!("Control context dropped the status request"),
            }
            return true;
        }
        _ => match line.parse::<Command>() {
            Ok(command) => ConsoleRequest::Command(command),
            Err(e) => {
                warn!("{}", e);
                return true;
            }
        },
    };
    if requests.send(request).is_err() {
        warn!("Control context is gone");
        return false;
    }
    true
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
