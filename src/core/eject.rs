use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How the tray is opened once a rip has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EjectMode {
    /// Platform command, or nothing in simulation mode.
    #[default]
    Auto,
    Command,
    None,
}

/// Opens the tray of a drive.
/// NOTE: Implementations may block; call from a blocking context.
pub trait EjectStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn eject(&self, device: &str) -> Result<()>;
}

/// Ejects by running an external utility. `{device}` in the arguments is
/// replaced with the device path.
pub struct CommandEject {
    program: String,
    args: Vec<String>,
}

impl CommandEject {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// util-linux `eject`.
    pub fn linux() -> Self {
        Self::new("eject", &["{device}"])
    }

    /// `drutil` only drives the default drive, the device is not passed.
    pub fn macos() -> Self {
        Self::new("drutil", &["tray", "eject"])
    }

    fn args_for(&self, device: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{device}", device))
            .collect()
    }
}

impl EjectStrategy for CommandEject {
    fn name(&self) -> &'static str {
        "command"
    }

    fn eject(&self, device: &str) -> Result<()> {
        let args = self.args_for(device);
        debug!(program = %self.program, ?args, "Running eject command");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .with_context(|| format!("Failed to run {}", self.program))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

pub struct NoEject;

impl EjectStrategy for NoEject {
    fn name(&self) -> &'static str {
        "none"
    }

    fn eject(&self, device: &str) -> Result<()> {
        debug!(device = %device, "Eject disabled, leaving tray closed");
        Ok(())
    }
}

/// Pick the eject strategy for this host. Resolved once at startup.
pub fn select(mode: EjectMode, simulation: bool) -> Arc<dyn EjectStrategy> {
    match mode {
        EjectMode::None => Arc::new(NoEject),
        EjectMode::Auto if simulation => Arc::new(NoEject),
        EjectMode::Auto | EjectMode::Command => platform_command(),
    }
}

#[cfg(target_os = "macos")]
fn platform_command() -> Arc<dyn EjectStrategy> {
    Arc::new(CommandEject::macos())
}

#[cfg(not(target_os = "macos"))]
fn platform_command() -> Arc<dyn EjectStrategy> {
    Arc::new(CommandEject::linux())
}
