//! FFmpeg subprocess-based frame source.
//!
//! Frames are decoded by an `ffmpeg` child process writing raw 8-bit gray
//! frames to stdout. Seeking restarts the child with a `select` filter so the
//! first delivered frame is exactly the requested index.

use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use image::GrayImage;

use super::properties::detect_properties;
use super::{Frame, FrameError, FrameResult, FrameSource, VideoProperties};

struct DecodeProcess {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

/// FFmpeg subprocess-based frame source.
pub struct FfmpegReader {
    path: PathBuf,
    properties: VideoProperties,
    process: Option<DecodeProcess>,
    next_index: u32,
}

impl FfmpegReader {
    /// Open a video file with FFmpeg.
    pub fn open(path: &Path) -> FrameResult<Self> {
        if !path.exists() {
            return Err(FrameError::OpenFailed {
                path: path.to_path_buf(),
                message: "File does not exist".to_string(),
            });
        }

        let properties = detect_properties(path)?;
        if properties.frame_bytes() == 0 {
            return Err(FrameError::OpenFailed {
                path: path.to_path_buf(),
                message: "No video dimensions reported".to_string(),
            });
        }

        tracing::debug!(
            "[FFmpeg] Opened video: {}x{} @ {:.3} fps, {} frames",
            properties.width,
            properties.height,
            properties.fps,
            properties.frame_count
        );

        Ok(Self {
            path: path.to_path_buf(),
            properties,
            process: None,
            next_index: 0,
        })
    }

    /// Check if FFmpeg is available.
    pub fn is_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn spawn(&self, start: u32) -> FrameResult<DecodeProcess> {
        tracing::trace!("[FFmpeg] Starting decode at frame {}", start);

        let mut command = Command::new("ffmpeg");
        command.args(["-v", "error", "-nostdin", "-i"]).arg(&self.path);
        if start > 0 {
            command.args(["-vf", &format!("select=gte(n\\,{})", start)]);
        }
        command
            .args(["-vsync", "0", "-f", "rawvideo", "-pix_fmt", "gray", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FrameError::FfmpegNotFound,
            _ => FrameError::OpenFailed {
                path: self.path.clone(),
                message: format!("FFmpeg execution failed: {}", e),
            },
        })?;

        let stdout = child.stdout.take().ok_or_else(|| FrameError::OpenFailed {
            path: self.path.clone(),
            message: "FFmpeg stdout unavailable".to_string(),
        })?;

        Ok(DecodeProcess {
            child,
            stdout: BufReader::new(stdout),
        })
    }

    fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.child.kill();
            let _ = process.child.wait();
        }
    }

    /// Collect the exit status of a finished child, turning failures into
    /// decode errors.
    fn finish(&mut self, index: u32) -> FrameResult<()> {
        let Some(process) = self.process.take() else {
            return Ok(());
        };
        let DecodeProcess { child, stdout } = process;
        drop(stdout);
        let output = child.wait_with_output().map_err(|e| FrameError::DecodeFailed {
            index,
            message: format!("FFmpeg wait failed: {}", e),
        })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(FrameError::DecodeFailed {
            index,
            message: format!(
                "FFmpeg failed: {}",
                stderr.lines().last().unwrap_or("unknown error")
            ),
        })
    }
}

impl FrameSource for FfmpegReader {
    fn properties(&self) -> &VideoProperties {
        &self.properties
    }

    fn seek(&mut self, index: u32) -> FrameResult<()> {
        if self.process.is_some() && index == self.next_index {
            return Ok(());
        }
        self.stop();
        self.next_index = index;
        Ok(())
    }

    fn next_frame(&mut self) -> FrameResult<Option<Frame>> {
        if self.process.is_none() {
            self.process = Some(self.spawn(self.next_index)?);
        }
        let index = self.next_index;
        let frame_bytes = self.properties.frame_bytes();
        let mut buffer = vec![0u8; frame_bytes];

        let mut filled = 0;
        if let Some(process) = self.process.as_mut() {
            while filled < frame_bytes {
                match process.stdout.read(&mut buffer[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        return Err(FrameError::DecodeFailed {
                            index,
                            message: format!("Pipe read failed: {}", e),
                        })
                    }
                }
            }
        }

        if filled == 0 {
            // End of stream: exhausted, unless ffmpeg itself reported an error.
            self.finish(index)?;
            return Ok(None);
        }
        if filled < frame_bytes {
            self.stop();
            return Err(FrameError::DecodeFailed {
                index,
                message: format!("Truncated frame ({} of {} bytes)", filled, frame_bytes),
            });
        }

        let image = GrayImage::from_raw(self.properties.width, self.properties.height, buffer)
            .ok_or_else(|| FrameError::DecodeFailed {
                index,
                message: "Frame buffer size mismatch".to_string(),
            })?;
        self.next_index += 1;
        Ok(Some(Frame { index, image }))
    }

    fn backend_name(&self) -> &str {
        "ffmpeg"
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_available() {
        // Just verify it doesn't panic
        let _available = FfmpegReader::is_available();
    }

    #[test]
    fn test_open_nonexistent() {
        let path = Path::new("/nonexistent/video.mkv");
        let result = FfmpegReader::open(path);
        assert!(matches!(result, Err(FrameError::OpenFailed { .. })));
    }
}
