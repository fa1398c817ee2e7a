use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::device::DiscKind;
use crate::core::eject::EjectMode;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/discd/config.toml";
const ENV_PREFIX: &str = "DISCD_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("{kind} rip command must not be empty")]
    EmptyCommand { kind: DiscKind },
    #[error("poll_timeout_ms must be greater than zero")]
    ZeroPollTimeout,
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Where and how one kind of disc is ripped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RipSettings {
    pub outdir: PathBuf,
    /// Program and arguments. `{device}`, `{outdir}` and any key of
    /// `options` are substituted before running.
    pub command: Vec<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannelType {
    #[default]
    None,
    Slack,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub channel: NotificationChannelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upper bound on how long the watchdog waits for a device event before
    /// re-checking for shutdown.
    pub poll_timeout_ms: u64,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
    pub eject: EjectMode,
    pub video: RipSettings,
    pub audio: RipSettings,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/discd"));

        let mut video_options = Map::new();
        video_options.insert("minlength".to_string(), Value::from(120));

        Self {
            poll_timeout_ms: 1000,
            simulation: false,
            verbose: false,
            json_logs: false,
            eject: EjectMode::Auto,
            video: RipSettings {
                outdir: home.join("Videos"),
                command: [
                    "makemkvcon",
                    "-r",
                    "--progress=-same",
                    "--minlength={minlength}",
                    "mkv",
                    "dev:{device}",
                    "all",
                    "{outdir}",
                ]
                .map(String::from)
                .to_vec(),
                options: video_options,
            },
            audio: RipSettings {
                outdir: home.join("Music"),
                command: ["abcde", "-N", "-d", "{device}"].map(String::from).to_vec(),
                options: Map::new(),
            },
            notifications: NotificationConfig::default(),
        }
    }
}

/// Per-kind overrides coming from the command line.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RipOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outdir: Option<PathBuf>,
}

impl RipOverrides {
    fn is_empty(&self) -> bool {
        self.outdir.is_none()
    }
}

/// Command-line overrides, merged on top of every other source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "RipOverrides::is_empty")]
    pub video: RipOverrides,
    #[serde(skip_serializing_if = "RipOverrides::is_empty")]
    pub audio: RipOverrides,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_logs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eject: Option<EjectMode>,
}

impl AppConfig {
    /// Load defaults, then the TOML file at `path` (if it exists), then
    /// `DISCD_*` environment variables, then `overrides`.
    pub fn new(path: &Path, overrides: Option<&CliOverrides>) -> Result<Self, ConfigError> {
        let mut figment = Self::figment(path);
        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in [DiscKind::Video, DiscKind::Audio] {
            if self.rip_settings(kind).command.is_empty() {
                return Err(ConfigError::EmptyCommand { kind });
            }
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::ZeroPollTimeout);
        }
        Ok(())
    }

    pub fn rip_settings(&self, kind: DiscKind) -> &RipSettings {
        match kind {
            DiscKind::Video => &self.video,
            DiscKind::Audio => &self.audio,
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Remembers where the configuration came from so it can be reloaded.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: PathBuf,
    overrides: CliOverrides,
}

impl ConfigLoader {
    pub fn new(path: PathBuf, overrides: CliOverrides) -> Self {
        Self { path, overrides }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        AppConfig::new(&self.path, Some(&self.overrides))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.video.command[0], "makemkvcon");
        assert_eq!(config.audio.command[0], "abcde");
    }

    #[test]
    fn test_file_and_overrides_layering() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
poll_timeout_ms = 250
eject = "none"

[video]
outdir = "/srv/video"
command = ["rip-video", "{device}"]

[video.options]
minlength = 600

[notifications]
channel = "slack"
slack_webhook = "https://hooks.example/abc"
"#,
        )
        .unwrap();

        let overrides = CliOverrides {
            video: RipOverrides {
                outdir: Some(PathBuf::from("/mnt/override")),
            },
            simulation: Some(true),
            ..Default::default()
        };
        let config = AppConfig::new(&path, Some(&overrides)).unwrap();

        assert_eq!(config.poll_timeout_ms, 250);
        assert_eq!(config.eject, EjectMode::None);
        assert_eq!(config.video.outdir, PathBuf::from("/mnt/override"));
        assert_eq!(config.video.command, vec!["rip-video", "{device}"]);
        assert_eq!(config.video.options["minlength"], Value::from(600));
        assert!(config.simulation);
        assert_eq!(config.notifications.channel, NotificationChannelType::Slack);
        // untouched sections keep their defaults
        assert_eq!(config.audio, AppConfig::default().audio);
    }

    #[test]
    fn test_loader_reload_picks_up_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[audio]\noutdir = \"/srv/music\"\n").unwrap();

        let loader = ConfigLoader::new(path.clone(), CliOverrides::default());
        assert_eq!(loader.load().unwrap().audio.outdir, PathBuf::from("/srv/music"));

        std::fs::write(&path, "[audio]\noutdir = \"/srv/flac\"\n").unwrap();
        assert_eq!(loader.load().unwrap().audio.outdir, PathBuf::from("/srv/flac"));
        assert_eq!(loader.path(), path.as_path());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::new(&dir.path().join("absent.toml"), None).unwrap();
        assert_eq!(config.video.command, AppConfig::default().video.command);
    }

    #[test]
    fn test_empty_command_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[audio]\ncommand = []\n").unwrap();

        let err = AppConfig::new(&path, None).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::EmptyCommand {
                kind: DiscKind::Audio
            }
        ));
    }

    #[test]
    fn test_zero_poll_timeout_rejected() {
        let config = AppConfig {
            poll_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroPollTimeout)));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
