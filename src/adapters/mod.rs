use anyhow::Result;
use tracing::info;

use crate::core::DeviceMonitor;

#[cfg(target_os = "linux")]
mod linux;
mod simulated;

#[cfg(target_os = "linux")]
pub use linux::{LinuxMonitor, LinuxMonitorConfig};
pub use simulated::{SimulatedMonitor, Simulator};

pub fn get_monitor(simulation: bool) -> Result<Box<dyn DeviceMonitor>> {
    if simulation {
        let (monitor, controller) = SimulatedMonitor::new();
        std::thread::spawn(move || {
            controller.read_commands(std::io::stdin().lock());
            info!("(Simulator) stdin closed, no more simulated events");
        });
        info!("(Simulator) Use: 'insert <dev> [video|audio]', 'eject <dev>' or 'tray <dev>'");
        return Ok(Box::new(monitor));
    }

    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(LinuxMonitor::with_defaults()))
    }

    #[cfg(not(target_os = "linux"))]
    {
        anyhow::bail!("udev monitoring is only available on Linux; use --simulation")
    }
}
