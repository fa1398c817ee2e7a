use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::rip_directory;
use crate::config::RipSettings;
use crate::core::device::DiscKind;
use crate::core::handler::{DiscHandler, OutcomeSender, RipRequest, RipperFactory, TaskHandler};
use crate::core::progress::{ProgressSink, RipProgress};
use crate::logging::ProgressLog;

/// Lines of stderr kept for the failure reason.
const STDERR_TAIL: usize = 20;

/// MakeMKV robot mode progress: `PRGV:current,total,max`
static PROGRESS_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^PRGV:(\d+),(\d+),(\d+)").expect("valid progress regex"));

/// MakeMKV robot mode operation title: `PRGT:code,id,"name"`
static PROGRESS_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^PRG[TC]:\d+,\d+,"([^"]*)""#).expect("valid title regex"));

/// Rips by running an external program, one child process per disc.
pub struct CommandRipper {
    kind: DiscKind,
    program: String,
    args: Vec<String>,
}

impl CommandRipper {
    pub fn new(kind: DiscKind, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind,
            program: program.into(),
            args,
        }
    }

    /// `None` if the configured command is empty.
    pub fn from_settings(kind: DiscKind, settings: &RipSettings) -> Option<Self> {
        let (program, args) = settings.command.split_first()?;
        Some(Self::new(kind, program.clone(), args.to_vec()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl RipperFactory for CommandRipper {
    fn name(&self) -> &str {
        &self.program
    }

    fn create(
        &self,
        request: RipRequest,
        outcomes: OutcomeSender,
    ) -> Result<Arc<dyn DiscHandler>> {
        if request.kind != self.kind {
            bail!("{} ripper cannot handle {} discs", self.kind, request.kind);
        }

        let cancel = CancellationToken::new();
        let span = info_span!(
            "rip",
            device = %request.device,
            kind = %request.kind,
            handler_id = %outcomes.handler_id()
        );
        let job = run(
            self.program.clone(),
            self.args.clone(),
            request,
            cancel.clone(),
        )
        .instrument(span);

        Ok(Arc::new(TaskHandler::new(Box::pin(job), cancel, outcomes)))
    }
}

async fn run(
    program: String,
    args: Vec<String>,
    req: RipRequest,
    cancel: CancellationToken,
) -> Result<PathBuf> {
    let destination = rip_directory(&req.outdir, &req.device);
    tokio::fs::create_dir_all(&destination)
        .await
        .with_context(|| format!("Failed to create {}", destination.display()))?;

    let args = expand_args(&args, &req.device, &destination, &req.options);
    info!(program = %program, ?args, destination = %destination.display(), "Starting ripper");

    req.progress
        .report(RipProgress {
            kind: req.kind,
            stage: "starting".to_string(),
            percentage: 0,
        })
        .await;

    let mut child = Command::new(&program)
        .args(&args)
        .current_dir(&destination)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("Failed to capture ripper stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("Failed to capture ripper stderr"))?;

    let pump = tokio::spawn(pump_progress(stdout, req.kind, req.progress.clone()));
    let tail = tokio::spawn(collect_tail(stderr));

    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };

    let Some(status) = status else {
        warn!("Killing ripper process");
        child
            .kill()
            .await
            .context("Failed to kill ripper process")?;
        pump.abort();
        tail.abort();
        bail!("rip cancelled");
    };

    let status = status.context("Failed to wait for ripper")?;
    let _ = pump.await;
    let stderr_tail = tail.await.unwrap_or_default();

    if !status.success() {
        match stderr_tail.back() {
            Some(last) => bail!("{} exited with {}: {}", program, status, last),
            None => bail!("{} exited with {}", program, status),
        }
    }

    Ok(destination)
}

/// Substitute `{device}`, `{outdir}` and option placeholders.
fn expand_args(
    args: &[String],
    device: &str,
    destination: &Path,
    options: &Map<String, Value>,
) -> Vec<String> {
    let destination = destination.display().to_string();

    args.iter()
        .map(|arg| {
            let mut arg = arg
                .replace("{device}", device)
                .replace("{outdir}", &destination);
            for (key, value) in options {
                let placeholder = format!("{{{}}}", key);
                if arg.contains(&placeholder) {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    arg = arg.replace(&placeholder, &value);
                }
            }
            arg
        })
        .collect()
}

#[derive(Debug, PartialEq)]
enum ProgressLine {
    Value(u8),
    Stage(String),
}

fn parse_progress(line: &str) -> Option<ProgressLine> {
    if let Some(caps) = PROGRESS_VALUE.captures(line) {
        let total: u64 = caps[2].parse().ok()?;
        let max: u64 = caps[3].parse().ok()?;
        if max == 0 {
            return None;
        }
        let percentage = (u128::from(total.min(max)) * 100 / u128::from(max)) as u8;
        return Some(ProgressLine::Value(percentage));
    }

    PROGRESS_TITLE
        .captures(line)
        .map(|caps| ProgressLine::Stage(caps[1].to_string()))
}

async fn pump_progress(
    stdout: impl AsyncRead + Unpin,
    kind: DiscKind,
    progress: ProgressSink,
) {
    let mut progress_log = ProgressLog::new(Duration::from_secs(10));
    let mut lines = BufReader::new(stdout).lines();
    let mut current = RipProgress {
        kind,
        stage: "ripping".to_string(),
        percentage: 0,
    };

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                match parse_progress(&line) {
                    Some(ProgressLine::Value(percentage)) => current.percentage = percentage,
                    Some(ProgressLine::Stage(stage)) => current.stage = stage,
                    None => continue,
                }
                if progress_log.should_log(&current.stage) {
                    debug!(stage = %current.stage, percentage = current.percentage, "Rip progress");
                }
                progress.report(current.clone()).await;
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Stopped reading ripper output");
                break;
            }
        }
    }
}

async fn collect_tail(stderr: impl AsyncRead + Unpin) -> VecDeque<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_args() {
        let mut options = Map::new();
        options.insert("minlength".into(), Value::from(600));
        options.insert("profile".into(), Value::from("flac"));

        let args: Vec<String> = [
            "dev:{device}",
            "--minlength={minlength}",
            "-o",
            "{profile}",
            "{outdir}",
            "{unknown}",
        ]
        .map(String::from)
        .to_vec();

        let expanded = expand_args(&args, "/dev/sr0", Path::new("/out/sr0_x"), &options);
        assert_eq!(
            expanded,
            vec![
                "dev:/dev/sr0",
                "--minlength=600",
                "-o",
                "flac",
                "/out/sr0_x",
                "{unknown}"
            ]
        );
    }

    #[test]
    fn test_parse_progress_value() {
        assert_eq!(
            parse_progress("PRGV:100,32768,65536"),
            Some(ProgressLine::Value(50))
        );
        assert_eq!(
            parse_progress("PRGV:0,70000,65536"),
            Some(ProgressLine::Value(100))
        );
        assert_eq!(parse_progress("PRGV:0,0,0"), None);
    }

    #[test]
    fn test_parse_progress_huge_values() {
        let max = u64::MAX;
        assert_eq!(
            parse_progress(&format!("PRGV:0,{},{}", max, max)),
            Some(ProgressLine::Value(100))
        );
        assert_eq!(
            parse_progress(&format!("PRGV:0,{},{}", max / 2, max)),
            Some(ProgressLine::Value(49))
        );
        // Out of range for u64: not a progress line.
        assert_eq!(parse_progress("PRGV:0,1,99999999999999999999999"), None);
    }

    #[test]
    fn test_parse_progress_stage() {
        assert_eq!(
            parse_progress(r#"PRGT:5018,0,"Saving all titles to MKV files""#),
            Some(ProgressLine::Stage("Saving all titles to MKV files".into()))
        );
        assert_eq!(parse_progress("MSG:1005,0,1,\"MakeMKV started\""), None);
    }

    #[test]
    fn test_from_settings_splits_program() {
        let settings = RipSettings {
            outdir: PathBuf::from("/out"),
            command: vec!["abcde".into(), "-d".into(), "{device}".into()],
            options: Map::new(),
        };
        let ripper = CommandRipper::from_settings(DiscKind::Audio, &settings).unwrap();
        assert_eq!(ripper.program(), "abcde");
        assert_eq!(ripper.args, vec!["-d", "{device}"]);

        let empty = RipSettings {
            command: vec![],
            ..settings
        };
        assert!(CommandRipper::from_settings(DiscKind::Audio, &empty).is_none());
    }
}
