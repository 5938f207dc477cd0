//! Capture device discovery.

use std::path::PathBuf;

use lenscast_common::error::LenscastResult;

/// A local video input source usable as an encoder input.
///
/// Immutable value object; the supervisor only ever reads `id` when building
/// the encoder invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDevice {
    /// Device node handed to the encoder (e.g. `/dev/video0`).
    pub id: String,

    /// Human-readable device name.
    pub name: String,

    /// Free-form description (bus info where known).
    pub description: String,
}

impl CaptureDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
        }
    }
}

/// Enumerate capture devices.
///
/// Prefers `v4l2-ctl --list-devices`; falls back to scanning `/dev/video*`
/// when the tool is unavailable.
pub fn list_devices() -> LenscastResult<Vec<CaptureDevice>> {
    let output = std::process::Command::new("v4l2-ctl")
        .arg("--list-devices")
        .output();

    match output {
        Ok(out) if out.status.success() => {
            let text = String::from_utf8_lossy(&out.stdout);
            let devices = parse_v4l2_device_list(&text);
            if !devices.is_empty() {
                return Ok(devices);
            }
            tracing::debug!("v4l2-ctl returned no devices, falling back to /dev scan");
            Ok(scan_dev_video_nodes())
        }
        Ok(out) => {
            tracing::debug!(
                status = %out.status,
                "v4l2-ctl --list-devices failed, falling back to /dev scan"
            );
            Ok(scan_dev_video_nodes())
        }
        Err(e) => {
            tracing::debug!(error = %e, "v4l2-ctl not available, falling back to /dev scan");
            Ok(scan_dev_video_nodes())
        }
    }
}

/// Parse `v4l2-ctl --list-devices` output.
///
/// The format is a header line per physical device (name plus bus info in
/// parentheses) followed by indented device nodes. Only the first node of
/// each group is reported; the rest are metadata endpoints.
fn parse_v4l2_device_list(text: &str) -> Vec<CaptureDevice> {
    let mut devices = Vec::new();
    let mut current: Option<(String, String)> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            let header = line.trim_end_matches(':').trim();
            let (name, bus) = match header.rfind('(') {
                Some(open) => {
                    let name = header[..open].trim().to_string();
                    let bus = header[open + 1..].trim_end_matches(')').to_string();
                    (name, bus)
                }
                None => (header.to_string(), String::new()),
            };
            current = Some((name, bus));
        } else if let Some((name, bus)) = current.take() {
            let node = line.trim();
            if node.starts_with("/dev/video") {
                devices.push(CaptureDevice {
                    id: node.to_string(),
                    name,
                    description: bus,
                });
            } else {
                // Non-video node (media controller etc.); keep looking in
                // this group.
                current = Some((name, bus));
            }
        }
    }

    devices
}

fn scan_dev_video_nodes() -> Vec<CaptureDevice> {
    let mut nodes: Vec<PathBuf> = match std::fs::read_dir("/dev") {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix("video"))
                    .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    nodes.sort();

    nodes
        .into_iter()
        .map(|p| {
            let id = p.display().to_string();
            CaptureDevice {
                name: id.clone(),
                id,
                description: String::new(),
            }
        })
        .collect()
}
