//! Detector collaborator.
//!
//! The detection model is opaque: image in, labeled pixel centres out.
//! Labels other than person/object are dropped here, before the kernel.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::{Label, PixelPoint};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Detection {
    pub label: Label,
    pub pixel: PixelPoint,
}

impl Detection {
    pub fn new(label: Label, pixel: PixelPoint) -> Self {
        Self { label, pixel }
    }

    /// Accepts only the labels the kernel understands.
    pub fn from_label(label: &str, x: i32, y: i32) -> Option<Self> {
        let label = parse_label(label)?;
        Some(Self::new(label, PixelPoint::new(x, y)))
    }

    /// Centre of an `xyxy` box, truncated like the model output.
    pub fn from_box(label: &str, xyxy: [f64; 4]) -> Option<Self> {
        let cx = ((xyxy[0] + xyxy[2]) / 2.0).trunc() as i32;
        let cy = ((xyxy[1] + xyxy[3]) / 2.0).trunc() as i32;
        Self::from_label(label, cx, cy)
    }
}

pub fn parse_label(label: &str) -> Option<Label> {
    match label.trim().to_ascii_lowercase().as_str() {
        "person" => Some(Label::Person),
        "object" => Some(Label::Object),
        _ => None,
    }
}

pub trait Detector {
    fn name(&self) -> &'static str;

    fn detect(&mut self, image_path: &Path) -> Result<Vec<Detection>>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SidecarEntry {
    Centre {
        label: String,
        x: i32,
        y: i32,
    },
    Boxed {
        label: String,
        #[serde(rename = "box")]
        xyxy: [f64; 4],
    },
}

/// Reads precomputed model output from `<frame>.json` next to the frame.
#[derive(Clone, Debug, Default)]
pub struct SidecarDetector {
    skipped: u64,
}

impl SidecarDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sidecar_path(image_path: &Path) -> PathBuf {
        let mut name = image_path.as_os_str().to_owned();
        name.push(".json");
        PathBuf::from(name)
    }

    /// Detections dropped for unsupported labels so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl Detector for SidecarDetector {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    fn detect(&mut self, image_path: &Path) -> Result<Vec<Detection>> {
        let path = Self::sidecar_path(image_path);
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| anyhow!("failed to read detections {}: {}", path.display(), e))?;
        let entries: Vec<SidecarEntry> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detections {}: {}", path.display(), e))?;

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let (label, det) = match entry {
                SidecarEntry::Centre { label, x, y } => {
                    let det = Detection::from_label(&label, x, y);
                    (label, det)
                }
                SidecarEntry::Boxed { label, xyxy } => {
                    let det = Detection::from_box(&label, xyxy);
                    (label, det)
                }
            };
            match det {
                Some(det) => {
                    log::debug!("detected {:?} @ ({}, {})", det.label, det.pixel.x, det.pixel.y);
                    out.push(det);
                }
                None => {
                    log::debug!("ignoring detection with label {:?}", label);
                    self.skipped += 1;
                }
            }
        }
        Ok(out)
    }
}
