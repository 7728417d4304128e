//! Frame lookup by capture time.
//!
//! Frames are saved as `mm-ss.jpg`. A request prefers the exact frame and
//! otherwise walks back one second at a time, never forward.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_LOOKBACK: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedFrame {
    /// `mm-ss` of the frame actually used.
    pub time: String,
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct FrameResolver {
    dir: PathBuf,
    max_lookback: u32,
}

impl FrameResolver {
    pub fn new(dir: impl Into<PathBuf>, max_lookback: u32) -> Self {
        Self {
            dir: dir.into(),
            max_lookback,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_path(&self, total_seconds: u32) -> PathBuf {
        self.dir.join(format!("{}.jpg", format_time(total_seconds)))
    }

    /// Nearest existing frame at or before `time`, or `None` within the window.
    pub fn resolve(&self, time: &str) -> Result<Option<ResolvedFrame>> {
        let requested = parse_time(time)?;
        for offset in 0..=self.max_lookback {
            let Some(candidate) = requested.checked_sub(offset) else {
                break;
            };
            let path = self.frame_path(candidate);
            if path.exists() {
                if offset > 0 {
                    log::debug!(
                        "frame {} missing, using {} ({}s earlier)",
                        time,
                        format_time(candidate),
                        offset
                    );
                }
                return Ok(Some(ResolvedFrame {
                    time: format_time(candidate),
                    path,
                }));
            }
        }
        Ok(None)
    }
}

/// Parse `mm-ss` into seconds.
pub fn parse_time(time: &str) -> Result<u32> {
    let (mm, ss) = time
        .split_once('-')
        .ok_or_else(|| anyhow!("time '{}' must be formatted as mm-ss", time))?;
    let minutes: u32 = mm
        .trim()
        .parse()
        .map_err(|_| anyhow!("invalid minutes in time '{}'", time))?;
    let seconds: u32 = ss
        .trim()
        .parse()
        .map_err(|_| anyhow!("invalid seconds in time '{}'", time))?;
    if seconds >= 60 {
        return Err(anyhow!("seconds out of range in time '{}'", time));
    }
    minutes
        .checked_mul(60)
        .and_then(|total| total.checked_add(seconds))
        .ok_or_else(|| anyhow!("time '{}' out of range", time))
}

pub fn format_time(total_seconds: u32) -> String {
    format!("{:02}-{:02}", total_seconds / 60, total_seconds % 60)
}
