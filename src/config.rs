use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frames::DEFAULT_MAX_LOOKBACK;
use crate::report::{parse_report_url, HttpReportConfig, DEFAULT_REPORT_TIMEOUT};

const DEFAULT_DB_PATH: &str = "seats.db";
const DEFAULT_FRAMES_DIR: &str = "frames";
const MAX_LOOKBACK_LIMIT: u32 = 3600;

#[derive(Debug, Deserialize, Default)]
struct SeatConfigFile {
    db_path: Option<String>,
    frames: Option<FramesConfigFile>,
    report: Option<ReportConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct FramesConfigFile {
    dir: Option<PathBuf>,
    max_lookback: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ReportConfigFile {
    url: Option<String>,
    token: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SeatConfig {
    pub db_path: String,
    pub frames: FrameSettings,
    pub report: ReportSettings,
}

#[derive(Debug, Clone)]
pub struct FrameSettings {
    pub dir: PathBuf,
    pub max_lookback: u32,
}

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub url: Option<String>,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl ReportSettings {
    /// HTTP sink settings, when an endpoint is configured.
    pub fn http(&self) -> Option<HttpReportConfig> {
        self.url.as_ref().map(|url| HttpReportConfig {
            url: url.clone(),
            token: self.token.clone(),
            timeout: self.timeout,
        })
    }
}

impl SeatConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SEAT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SeatConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let frames = FrameSettings {
            dir: file
                .frames
                .as_ref()
                .and_then(|frames| frames.dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FRAMES_DIR)),
            max_lookback: file
                .frames
                .and_then(|frames| frames.max_lookback)
                .unwrap_or(DEFAULT_MAX_LOOKBACK),
        };
        let report = ReportSettings {
            url: file.report.as_ref().and_then(|report| report.url.clone()),
            token: file.report.as_ref().and_then(|report| report.token.clone()),
            timeout: file
                .report
                .and_then(|report| report.timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_REPORT_TIMEOUT),
        };
        Self {
            db_path,
            frames,
            report,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SEAT_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("SEAT_FRAMES_DIR") {
            if !dir.trim().is_empty() {
                self.frames.dir = PathBuf::from(dir);
            }
        }
        if let Ok(lookback) = std::env::var("SEAT_FRAMES_MAX_LOOKBACK") {
            self.frames.max_lookback = lookback.parse().map_err(|_| {
                anyhow!("SEAT_FRAMES_MAX_LOOKBACK must be an integer number of seconds")
            })?;
        }
        if let Ok(url) = std::env::var("SEAT_REPORT_URL") {
            if !url.trim().is_empty() {
                self.report.url = Some(url);
            }
        }
        if let Ok(token) = std::env::var("SEAT_REPORT_TOKEN") {
            if !token.trim().is_empty() {
                self.report.token = Some(token);
            }
        }
        if let Ok(timeout) = std::env::var("SEAT_REPORT_TIMEOUT_MS") {
            let ms: u64 = timeout.parse().map_err(|_| {
                anyhow!("SEAT_REPORT_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.report.timeout = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.frames.max_lookback == 0 || self.frames.max_lookback > MAX_LOOKBACK_LIMIT {
            return Err(anyhow!(
                "frames.max_lookback must be between 1 and {}",
                MAX_LOOKBACK_LIMIT
            ));
        }
        if self.report.timeout.is_zero() {
            return Err(anyhow!("report timeout must be greater than zero"));
        }
        if let Some(url) = &self.report.url {
            parse_report_url(url)?;
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SeatConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
