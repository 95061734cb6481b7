use pedal_link::domain::models::MessageSeverity;
use pedal_link::domain::settings::SettingsService;
use pedal_link::infrastructure::bluetooth::Transport;
use pedal_link::infrastructure::logging;
use pedal_link::{AppEvent, OutboundCommand, PedalController, PresentationState};
use std::io::BufRead;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

const HELP: &str = "commands: scan | stop | list | select <n> | next | prev | disconnect | quit";

#[cfg(windows)]
fn platform_transport() -> anyhow::Result<Arc<dyn Transport>> {
    Ok(Arc::new(
        pedal_link::infrastructure::bluetooth::winrt::WinRtTransport::new(),
    ))
}

#[cfg(not(windows))]
fn platform_transport() -> anyhow::Result<Arc<dyn Transport>> {
    anyhow::bail!("no Bluetooth transport backend is available on this platform")
}

fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();
    info!("Starting Pedal Link");
    info!("Settings file: {}", settings_service.path().display());

    let (controller, mut events) = PedalController::spawn(platform_transport()?, &settings)?;
    let state = Arc::new(Mutex::new(PresentationState::default()));

    let printer_state = state.clone();
    let printer = std::thread::spawn(move || {
        while let Some(event) = events.blocking_recv() {
            report(&event);
            if let Ok(mut state) = printer_state.lock() {
                state.apply(&event);
            }
        }
    });

    println!("{}", HELP);
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        let result = match (words.next(), words.next()) {
            (Some("scan"), _) => controller.start_scan(),
            (Some("stop"), _) => controller.stop_scan(),
            (Some("next"), _) => controller.send_command(OutboundCommand::NextPatch),
            (Some("prev"), _) => controller.send_command(OutboundCommand::PreviousPatch),
            (Some("disconnect"), _) => controller.disconnect(),
            (Some("quit"), _) => break,
            (Some("list"), _) => {
                if let Ok(state) = state.lock() {
                    for (i, device) in state.registry.iter().enumerate() {
                        println!("{:>2}: {} [{}]", i, device.display_name, device.id);
                    }
                    println!("{:?}, status {:?}", state.connection_state, state.status_signal);
                }
                Ok(())
            }
            (Some("select"), Some(index)) => {
                let device = index.parse::<usize>().ok().and_then(|i| {
                    state.lock().ok().and_then(|s| s.registry.get(i).cloned())
                });
                match device {
                    Some(device) => controller.select_device(device.id),
                    None => {
                        println!("no device #{}", index);
                        Ok(())
                    }
                }
            }
            (None, _) => Ok(()),
            _ => {
                println!("{}", HELP);
                Ok(())
            }
        };
        if let Err(e) = result {
            error!("{}", e);
            break;
        }
    }

    controller.shutdown();
    let _ = printer.join();
    Ok(())
}

fn report(event: &AppEvent) {
    match event {
        AppEvent::RegistryChanged(devices) => info!("{} device(s) found", devices.len()),
        AppEvent::ConnectionState(state) => info!("Connection: {:?}", state),
        AppEvent::StatusSignal(signal) => info!("Status: {:?}", signal),
        AppEvent::PedalEcho(command) => info!("Pedal pressed: {:?}", command),
        AppEvent::PermissionDenied => warn!("Bluetooth is unavailable or not permitted"),
        AppEvent::LogMessage(message) => match message.severity {
            MessageSeverity::Warning | MessageSeverity::Error => warn!("{}", message.message),
            MessageSeverity::Info | MessageSeverity::Success => info!("{}", message.message),
        },
    }
}
