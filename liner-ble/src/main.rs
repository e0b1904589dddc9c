//! BLE tool for liner devices
//!
//! Scans for liner devices, connects through the controller runtime and
//! prints the events it produces as JSON.

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use liner_ble::{Cli, Commands};
use liner_controller::ble::BtleplugTransport;
use liner_controller::runtime::{self, Handle};
use liner_controller::{config, Controller, Event, EventSink, LinerConfig, ScanTarget};
use liner_proto::ProtocolUuids;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };

    match cli.command {
        Commands::Init {
            uuids,
            scan_duration_ms,
        } => init(&config_path, &uuids, scan_duration_ms),
        command => run(command, &config_path).await,
    }
}

fn init(
    config_path: &Path,
    uuids: &[String],
    scan_duration_ms: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = LinerConfig::load_or_default(config_path)?;
    config.uuids = Some(ProtocolUuids::from_strings(uuids)?);
    if let Some(ms) = scan_duration_ms {
        config.scan_duration_ms = ms;
    }
    config.save(config_path)?;
    println!("Saved {}", config_path.display());
    Ok(())
}

async fn run(command: Commands, config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    log::debug!("using config {}", config_path.display());
    let config = LinerConfig::load_or_default(config_path)?;
    let uuids = config.require_uuids(config_path)?;

    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let transport = BtleplugTransport::new(transport_tx).await?;
    let (sink, mut events) = EventSink::new();
    let (handle, _task) = runtime::spawn(Controller::new(transport, sink), transport_rx);
    handle.initialize(uuids).await?;

    match command {
        Commands::Scan { duration_ms, dfu } => {
            let duration = duration_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.scan_duration());
            let target = if dfu {
                ScanTarget::AlternateTarget
            } else {
                ScanTarget::Default
            };

            println!("Scanning for liner devices ({} ms)...", duration.as_millis());
            handle.scan(target, duration).await?;
            tokio::time::sleep(duration).await;

            let devices = handle.detected_devices().await?;
            println!("\nFound {} devices:", devices.len());
            for device in devices {
                println!(
                    "  {} ({})",
                    device.name.as_deref().unwrap_or("Unknown"),
                    device.id
                );
            }
        }
        Commands::Monitor { device } => {
            connect(&handle, &config, &device).await?;
            println!("Monitoring {device}, Ctrl-C to stop");
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => println!("{}", serde_json::to_string(&event)?),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            handle.disconnect(&device).await?;
        }
        Commands::Send {
            device,
            payload,
            wait_ms,
        } => {
            connect(&handle, &config, &device).await?;
            handle.send_command(&device, payload.0).await?;
            println!("Command written");
            print_events(&mut events, Duration::from_millis(wait_ms)).await?;
            handle.disconnect(&device).await?;
        }
        Commands::Request {
            device,
            request,
            wait_ms,
        } => {
            connect(&handle, &config, &device).await?;
            handle.send(&device, request.command()).await?;
            println!("Sent {request:?}");
            print_events(&mut events, Duration::from_millis(wait_ms)).await?;
            handle.disconnect(&device).await?;
        }
        Commands::Status { device } => {
            connect(&handle, &config, &device).await?;
            handle.check_mode(&device).await?;

            let state = tokio::time::timeout(Duration::from_secs(3), async {
                while let Some(event) = events.recv().await {
                    if let Event::UpdateDeviceState { state, .. } = event {
                        return Some(state);
                    }
                }
                None
            })
            .await
            .ok()
            .flatten();

            println!("Device:   {device}");
            match state {
                Some(state) => println!("State:    {state}"),
                None => println!("State:    unknown"),
            }
            println!(
                "MAC:      {}",
                handle.mac_address(&device).await.unwrap_or_default()
            );
            println!(
                "Firmware: {}",
                handle
                    .firmware_version(&device)
                    .await
                    .unwrap_or_else(|| "unknown".to_string())
            );
            handle.disconnect(&device).await?;
        }
        Commands::Init { .. } => {}
    }

    Ok(())
}

/// Scan until `device` shows up, then connect to it
async fn connect(
    handle: &Handle,
    config: &LinerConfig,
    device: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let duration = config.scan_duration();
    println!("Looking for {device}...");
    handle.scan(ScanTarget::Default, duration).await?;

    let deadline = tokio::time::Instant::now() + duration;
    while tokio::time::Instant::now() < deadline {
        let devices = handle.detected_devices().await?;
        if devices.iter().any(|d| d.id == device) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    handle.stop_scan().await?;

    println!("Connecting...");
    handle.connect(device).await?;
    println!("Connected!");
    Ok(())
}

async fn print_events(
    events: &mut mpsc::UnboundedReceiver<Event>,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let deadline = tokio::time::Instant::now() + wait;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        if matches!(event, Event::UpdateDetectedDevices(_)) {
            continue;
        }
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}
