//! Ripping engines and the capability table built from them.

mod command;
mod simulated;

pub use command::CommandRipper;
pub use simulated::SimulatedRipper;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::core::device::DiscKind;
use crate::core::handler::{RipperFactory, Rippers};

/// Resolve which kinds of disc can be ripped on this host.
///
/// In simulation mode both kinds use the simulated ripper. Otherwise a kind
/// is only available when its command resolves on `PATH`.
pub fn create_rippers(config: &AppConfig) -> Rippers {
    if config.simulation {
        return Rippers::new(
            Some(Arc::new(SimulatedRipper::default())),
            Some(Arc::new(SimulatedRipper::default())),
        );
    }

    let resolve = |kind: DiscKind| -> Option<Arc<dyn RipperFactory>> {
        let ripper = CommandRipper::from_settings(kind, config.rip_settings(kind))?;
        if program_available(ripper.program()) {
            info!(%kind, program = %ripper.program(), "Ripper available");
            Some(Arc::new(ripper))
        } else {
            warn!(
                %kind,
                program = %ripper.program(),
                "Ripper not found on PATH, these discs will be ignored"
            );
            None
        }
    };

    Rippers::new(resolve(DiscKind::Video), resolve(DiscKind::Audio))
}

/// True if `program` is an executable path or can be found on `PATH`.
pub fn program_available(program: &str) -> bool {
    if program.contains('/') {
        return Path::new(program).is_file();
    }

    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

/// Per-rip output directory: `<outdir>/<device name>_<timestamp>`.
pub fn rip_directory(outdir: &Path, device: &str) -> PathBuf {
    let name = Path::new(device)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "disc".to_string());

    outdir.join(format!("{}_{}", name, Utc::now().format("%Y%m%dT%H%M%S")))
}
