//! Video resolution via FFprobe

use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use tracing::{debug, trace};

use super::Resolution;
use crate::error::{Error, Result};

/// Cached FFprobe availability check
static FFPROBE_AVAILABLE: OnceLock<bool> = OnceLock::new();

fn is_ffprobe_available() -> bool {
    *FFPROBE_AVAILABLE.get_or_init(|| Command::new("ffprobe").arg("-version").output().is_ok())
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<StreamInfo>,
}

#[derive(Debug, Deserialize)]
struct StreamInfo {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Read the frame size of the first video stream
pub fn probe_video_resolution(path: &Path) -> Result<Resolution> {
    if !is_ffprobe_available() {
        return Err(Error::FfprobeNotFound);
    }

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-select_streams",
            "v:0",
        ])
        .arg(path)
        .output()
        .map_err(|e| Error::Probe {
            path: path.to_path_buf(),
            message: format!("Failed to execute ffprobe: {}", e),
        })?;

    if !output.status.success() {
        return Err(Error::Probe {
            path: path.to_path_buf(),
            message: format!(
                "FFprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ),
        });
    }

    let json_str = String::from_utf8_lossy(&output.stdout);
    trace!(?path, "FFprobe output: {}", json_str);

    let resolution = parse_ffprobe_resolution(&json_str).map_err(|message| Error::Probe {
        path: path.to_path_buf(),
        message,
    })?;
    debug!(?path, %resolution, "Read video resolution");
    Ok(resolution)
}

fn parse_ffprobe_resolution(json: &str) -> std::result::Result<Resolution, String> {
    let probe: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| format!("Failed to parse FFprobe JSON: {}", e))?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| "No video stream found".to_string())?;

    match (stream.width, stream.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => {
            Ok(Resolution::new(width, height))
        }
        _ => Err("Video stream has no frame size".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_first_video_stream() {
        let json = r#"{
            "streams": [
                {"codec_type": "audio", "sample_rate": "48000"},
                {"codec_type": "video", "width": 2048, "height": 858},
                {"codec_type": "video", "width": 320, "height": 240}
            ]
        }"#;
        assert_eq!(
            parse_ffprobe_resolution(json).unwrap(),
            Resolution::new(2048, 858)
        );
    }

    #[test]
    fn test_parse_without_video_stream() {
        assert!(parse_ffprobe_resolution(r#"{"streams": []}"#).is_err());
        assert!(parse_ffprobe_resolution("{}").is_err());
        assert!(parse_ffprobe_resolution(r#"{"streams": [{"codec_type": "video"}]}"#).is_err());
        assert!(parse_ffprobe_resolution("not json").is_err());
    }
}
