// tools/zlgcan_cli/main.rs
//
// Bench tool for ZLG adapters: opens a device profile from the settings file
// and prints board information, streams received frames or sends a frame.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::Notify;

use zlgcan::io::CanDriver;
use zlgcan::settings::{default_settings_path, load_settings, DeviceProfile, Settings};
use zlgcan::{AsyncCanDevice, CanError, CanFrame, CanRuntime, Result};

#[derive(Parser)]
#[command(name = "zlgcan_cli", version, about = "ZLG USB-CAN / CANET bench tool")]
struct Cli {
    /// Settings file (TOML, or JSON by extension)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Driver backend
    #[arg(long, value_enum, global = true, default_value_t = default_driver())]
    driver: DriverKind,

    /// Also write log lines to a timestamped file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the device profiles in the settings file
    Profiles,
    /// Connect and print board, status and error information
    Info { profile: String },
    /// Print received frames until Ctrl-C or device loss
    Monitor { profile: String },
    /// Send one data frame
    Send {
        profile: String,
        /// Identifier in hex, e.g. 7DF or 18FEF100
        #[arg(long)]
        id: String,
        /// Payload in hex, up to 8 bytes, e.g. 0201 0D
        #[arg(long, default_value = "")]
        data: String,
        /// Force a 29-bit identifier
        #[arg(long)]
        extended: bool,
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DriverKind {
    Controlcan,
    Mock,
}

fn default_driver() -> DriverKind {
    if cfg!(feature = "controlcan") {
        DriverKind::Controlcan
    } else {
        DriverKind::Mock
    }
}

fn make_driver(kind: DriverKind) -> Result<Arc<dyn CanDriver>> {
    match kind {
        #[cfg(feature = "controlcan")]
        DriverKind::Controlcan => Ok(Arc::new(zlgcan::io::ControlCanDriver::new())),
        #[cfg(not(feature = "controlcan"))]
        DriverKind::Controlcan => Err(CanError::configuration(
            "built without the `controlcan` feature",
        )),
        DriverKind::Mock => Ok(Arc::new(zlgcan::io::MockDriver::new())),
    }
}

fn load(cli: &Cli) -> Result<Settings> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => default_settings_path()
            .ok_or_else(|| CanError::configuration("no config directory, pass --config"))?,
    };
    load_settings(&path)
}

fn find<'a>(settings: &'a Settings, name: &str) -> Result<&'a DeviceProfile> {
    settings
        .profile(name)
        .ok_or_else(|| CanError::configuration(format!("unknown profile '{}'", name)))
}

fn parse_id(text: &str) -> Result<u32> {
    let digits = text.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16)
        .map_err(|e| CanError::configuration(format!("invalid id '{}': {}", text, e)))
}

fn parse_data(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&compact)
        .map_err(|e| CanError::configuration(format!("invalid data '{}': {}", text, e)))
}

async fn run(cli: Cli) -> Result<()> {
    let log_dir = cli.log_dir.clone();
    let settings = load(&cli)?;
    if let Some(dir) = log_dir.or_else(|| settings.log_dir.clone()) {
        zlgcan::logging::init_file_logging(&dir).map_err(CanError::configuration)?;
    }

    let runtime = CanRuntime::new(make_driver(cli.driver)?);

    match cli.command {
        Command::Profiles => {
            for profile in &settings.devices {
                let target = match (&profile.ip, profile.port) {
                    (Some(ip), Some(port)) => format!("{}:{}", ip, port),
                    _ => format!("index {:?}", profile.device_index),
                };
                println!(
                    "{:<16} {:?} {:?} channel {} ({})",
                    profile.name, profile.kind, profile.device_type, profile.can_index, target
                );
            }
        }

        Command::Info { profile } => {
            let device = find(&settings, &profile)?.build(&runtime)?;
            device.connect_async().await?;
            let board = device.read_board_info_async().await?;
            let status = device.read_status_async().await?;
            let error = device.read_error_info_async().await?;
            println!("device:    {}", device.label());
            println!("hardware:  {}", board.hardware_type_str());
            println!("serial:    {}", board.serial_number_str());
            println!(
                "versions:  hw {:04X} fw {:04X} drv {:04X} api {:04X}",
                board.hardware_version,
                board.firmware_version,
                board.driver_version,
                board.interface_version
            );
            println!("channels:  {}", board.can_channel_count);
            println!(
                "status:    {}",
                serde_json::to_string(&status).unwrap_or_default()
            );
            println!("error:     0x{:04X}", error.error_code);
            device.disconnect_async().await?;
        }

        Command::Monitor { profile } => {
            let profile = find(&settings, &profile)?;
            let device = profile.build(&runtime)?;
            device.connect_async().await?;

            let lost = Arc::new(Notify::new());
            let notify = lost.clone();
            device.on_connection_lost(move |event| {
                eprintln!("connection lost: {} ({})", event.device, event.reason);
                notify.notify_one();
            });
            device.on_error_occurred(|event| {
                eprintln!("controller error 0x{:04X} on {}", event.info.error_code, event.device);
            });

            let started = std::time::Instant::now();
            device.subscribe(
                profile.polling_interval_ms,
                profile.wait_time_ms,
                Arc::new(move |frames: &[CanFrame]| {
                    let elapsed = started.elapsed().as_secs_f64();
                    for frame in frames {
                        println!("{:>12.6}  {}", elapsed, frame);
                    }
                }),
            )?;

            println!("Monitoring {} (Ctrl-C to stop)", device.label());
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = lost.notified() => {}
            }
            device.disconnect_async().await?;
        }

        Command::Send {
            profile,
            id,
            data,
            extended,
            repeat,
        } => {
            let id = parse_id(&id)?;
            let payload = parse_data(&data)?;
            let frame = if extended || id > 0x7FF {
                CanFrame::new_extended(id, &payload)?
            } else {
                CanFrame::new(id, &payload)?
            };

            let device = find(&settings, &profile)?.build(&runtime)?;
            device.connect_async().await?;
            let frames = vec![frame; repeat.max(1) as usize];
            let accepted = device.transmit_async(frames).await?;
            println!("{} accepted {}/{} x {}", device.label(), accepted, repeat.max(1), frame);
            tokio::time::sleep(Duration::from_millis(50)).await;
            device.disconnect_async().await?;
        }
    }

    runtime.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
