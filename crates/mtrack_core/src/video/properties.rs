//! Video property detection via ffprobe.

use std::path::Path;
use std::process::Command;

use super::{FrameError, FrameResult, VideoProperties};

/// Detect video properties from a file using ffprobe.
///
/// Missing values are left at zero; callers decide whether an unknown fps
/// is fatal.
///
/// # Logging
/// Logs detected values with `[VideoProps]` prefix
pub fn detect_properties(path: &Path) -> FrameResult<VideoProperties> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=r_frame_rate,avg_frame_rate,nb_frames,duration,width,height",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FrameError::FfmpegNotFound,
            _ => FrameError::PropertiesFailed(format!("ffprobe execution failed: {}", e)),
        })?;

    if !output.status.success() {
        return Err(FrameError::OpenFailed {
            path: path.to_path_buf(),
            message: "ffprobe could not read the file".to_string(),
        });
    }

    let json_str = String::from_utf8_lossy(&output.stdout);
    let props = parse_ffprobe_json(&json_str)?;

    tracing::debug!(
        "[VideoProps] {}: {}x{} @ {:.3} fps, {} frames",
        path.display(),
        props.width,
        props.height,
        props.fps,
        props.frame_count
    );

    Ok(props)
}

/// Parse ffprobe's JSON output into properties.
pub(crate) fn parse_ffprobe_json(json_str: &str) -> FrameResult<VideoProperties> {
    let data: serde_json::Value = serde_json::from_str(json_str).map_err(|e| {
        FrameError::PropertiesFailed(format!("Failed to parse ffprobe JSON: {}", e))
    })?;

    let stream = data
        .get("streams")
        .and_then(|s| s.as_array())
        .and_then(|s| s.first())
        .ok_or_else(|| FrameError::PropertiesFailed("No video streams found".to_string()))?;

    let rate = |key: &str| {
        stream
            .get(key)
            .and_then(|v| v.as_str())
            .and_then(parse_fps_fraction)
            .filter(|fps| *fps > 0.0)
    };
    // avg_frame_rate reflects the actual sample interval for most containers;
    // r_frame_rate is the fallback.
    let fps = rate("avg_frame_rate").or_else(|| rate("r_frame_rate")).unwrap_or(0.0);

    let width = stream.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let height = stream.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    let parse_str_f64 = |v: Option<&serde_json::Value>| {
        v.and_then(|v| v.as_str())
            .filter(|s| *s != "N/A")
            .and_then(|s| s.parse::<f64>().ok())
    };

    let mut frame_count = stream
        .get("nb_frames")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(0);

    // Estimate frame count from duration if not available (MKV/WebM)
    if frame_count == 0 && fps > 0.0 {
        let duration = parse_str_f64(stream.get("duration"))
            .or_else(|| parse_str_f64(data.get("format").and_then(|f| f.get("duration"))));
        if let Some(secs) = duration {
            frame_count = (secs * fps).round() as u32;
        }
    }

    Ok(VideoProperties {
        fps,
        frame_count,
        width,
        height,
    })
}

/// Parse an FPS string like "30000/1001" or "25".
pub fn parse_fps_fraction(s: &str) -> Option<f64> {
    if let Some((num, denom)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let denom: f64 = denom.trim().parse().ok()?;
        if denom != 0.0 {
            return Some(num / denom);
        }
        None
    } else {
        s.trim().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_fraction_parsing() {
        assert!((parse_fps_fraction("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_fps_fraction("25"), Some(25.0));
        assert_eq!(parse_fps_fraction("0/0"), None);
        assert_eq!(parse_fps_fraction("abc"), None);
    }

    #[test]
    fn ffprobe_json_with_frame_count() {
        let json = r#"{"streams":[{"r_frame_rate":"30/1","avg_frame_rate":"30/1",
            "nb_frames":"300","width":640,"height":480}],"format":{"duration":"10.0"}}"#;
        let props = parse_ffprobe_json(json).unwrap();
        assert_eq!(props.fps, 30.0);
        assert_eq!(props.frame_count, 300);
        assert_eq!((props.width, props.height), (640, 480));
    }

    #[test]
    fn ffprobe_json_estimates_frames_from_duration() {
        let json = r#"{"streams":[{"r_frame_rate":"25/1","avg_frame_rate":"0/0",
            "width":320,"height":240}],"format":{"duration":"4.0"}}"#;
        let props = parse_ffprobe_json(json).unwrap();
        assert_eq!(props.fps, 25.0);
        assert_eq!(props.frame_count, 100);
    }

    #[test]
    fn ffprobe_json_without_streams_fails() {
        assert!(parse_ffprobe_json(r#"{"streams":[]}"#).is_err());
    }
}
