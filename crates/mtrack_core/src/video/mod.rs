//! Frame sources.
//!
//! Tracking and matching consume decoded grayscale frames through the
//! [`FrameSource`] trait. Two backends are provided:
//! - FFmpeg subprocess (`ffprobe` for properties, raw gray frames over a pipe)
//! - In-memory frames (synthetic videos, tests)
//!
//! # Usage
//!
//! ```ignore
//! use mtrack_core::video::{open_video, FrameSource};
//!
//! let mut source = open_video(path)?;
//! source.seek(section.start)?;
//! while let Some(frame) = source.next_frame()? {
//!     // ...
//! }
//! ```

mod ffmpeg;
mod memory;
mod properties;

use std::path::{Path, PathBuf};

use image::GrayImage;
use thiserror::Error;

pub use ffmpeg::FfmpegReader;
pub use memory::MemoryVideo;
pub use properties::{detect_properties, parse_fps_fraction};

/// File extensions recognised as videos when expanding directories.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

/// Errors raised by frame sources.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Failed to open video file.
    #[error("Failed to open video '{path}': {message}")]
    OpenFailed { path: PathBuf, message: String },

    /// A frame could not be decoded.
    #[error("Failed to decode frame {index}: {message}")]
    DecodeFailed { index: u32, message: String },

    /// Requested frame does not exist.
    #[error("Frame {index} is out of range (frame count {frame_count})")]
    OutOfRange { index: u32, frame_count: u32 },

    /// Video properties detection failed.
    #[error("Failed to detect video properties: {0}")]
    PropertiesFailed(String),

    /// The frame rate is missing or not positive.
    #[error("Cannot detect fps for '{0}'")]
    UnknownFps(PathBuf),

    /// FFmpeg not available.
    #[error("FFmpeg not found or not executable")]
    FfmpegNotFound,
}

/// Result type for frame source operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Video metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoProperties {
    /// Frames per second (0 when unknown).
    pub fps: f64,
    pub frame_count: u32,
    pub width: u32,
    pub height: u32,
}

impl VideoProperties {
    /// Bytes of one 8-bit grayscale frame.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// A decoded grayscale frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u32,
    pub image: GrayImage,
}

/// Sequential access to decoded frames of one video.
pub trait FrameSource: Send {
    /// Video metadata.
    fn properties(&self) -> &VideoProperties;

    /// Position the source so that the next frame returned is `index`.
    fn seek(&mut self, index: u32) -> FrameResult<()>;

    /// Next frame in order, `None` once the video is exhausted.
    fn next_frame(&mut self) -> FrameResult<Option<Frame>>;

    /// Backend name for logging.
    fn backend_name(&self) -> &str;

    /// Random access to a single frame.
    fn read_frame_at(&mut self, index: u32) -> FrameResult<Frame> {
        self.seek(index)?;
        let frame_count = self.properties().frame_count;
        self.next_frame()?
            .ok_or(FrameError::OutOfRange { index, frame_count })
    }
}

/// Opens frame sources for paths.
///
/// The orchestrator is generic over this so runs can be driven by
/// in-memory videos.
pub trait VideoOpener: Send + Sync {
    fn open(&self, path: &Path) -> FrameResult<Box<dyn FrameSource>>;
}

/// Opener backed by the FFmpeg subprocess reader.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegOpener;

impl VideoOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> FrameResult<Box<dyn FrameSource>> {
        open_video(path)
    }
}

/// Open a video file with the FFmpeg backend.
///
/// # Logging
/// Logs the opened stream with `[VideoReader]` prefix
pub fn open_video(path: &Path) -> FrameResult<Box<dyn FrameSource>> {
    let filename = path
        .file_name()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();

    tracing::info!("[VideoReader] Opening video: {}", filename);

    match FfmpegReader::open(path) {
        Ok(reader) => {
            let props = reader.properties();
            tracing::info!(
                "[VideoReader] Video: {}x{} @ {:.3} fps, {} frames",
                props.width,
                props.height,
                props.fps,
                props.frame_count
            );
            Ok(Box::new(reader))
        }
        Err(e) => {
            tracing::error!("[VideoReader] FFmpeg failed: {}", e);
            Err(e)
        }
    }
}

/// Whether a path has a known video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            VIDEO_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}
