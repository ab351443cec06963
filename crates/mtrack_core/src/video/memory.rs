//! In-memory frame source.

use image::GrayImage;

use super::{Frame, FrameResult, FrameSource, VideoProperties};

/// A video held entirely in memory.
///
/// Used for synthetic sequences; all frames must share one size.
#[derive(Debug, Clone)]
pub struct MemoryVideo {
    frames: Vec<GrayImage>,
    properties: VideoProperties,
    position: usize,
}

impl MemoryVideo {
    pub fn new(frames: Vec<GrayImage>, fps: f64) -> Self {
        let (width, height) = frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
        let properties = VideoProperties {
            fps,
            frame_count: frames.len() as u32,
            width,
            height,
        };
        Self {
            frames,
            properties,
            position: 0,
        }
    }

    /// Build frames by calling `render` for each index.
    pub fn from_fn(count: u32, fps: f64, render: impl FnMut(u32) -> GrayImage) -> Self {
        Self::new((0..count).map(render).collect(), fps)
    }

    pub fn frames(&self) -> &[GrayImage] {
        &self.frames
    }
}

impl FrameSource for MemoryVideo {
    fn properties(&self) -> &VideoProperties {
        &self.properties
    }

    fn seek(&mut self, index: u32) -> FrameResult<()> {
        self.position = index as usize;
        Ok(())
    }

    fn next_frame(&mut self) -> FrameResult<Option<Frame>> {
        let Some(image) = self.frames.get(self.position) else {
            return Ok(None);
        };
        let frame = Frame {
            index: self.position as u32,
            image: image.clone(),
        };
        self.position += 1;
        Ok(Some(frame))
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn iterates_from_seek_position() {
        let mut video = MemoryVideo::from_fn(5, 25.0, |i| GrayImage::from_pixel(2, 2, Luma([i as u8])));
        video.seek(3).unwrap();
        assert_eq!(video.next_frame().unwrap().unwrap().image.get_pixel(0, 0)[0], 3);
        assert_eq!(video.next_frame().unwrap().unwrap().index, 4);
        assert!(video.next_frame().unwrap().is_none());
        assert_eq!(video.properties().frame_count, 5);
        assert_eq!(video.properties().width, 2);
    }
}
