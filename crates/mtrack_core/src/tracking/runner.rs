//! Section runner: feeds every frame of a section to all object trackers.

use super::{ObjectTracker, TrackingError, TrackingOptions, TrackingResult};
use crate::error::ConfigurationError;
use crate::models::{Roi, Section, TrackedObject, Trajectory};
use crate::orchestrator::CancelHandle;
use crate::video::FrameSource;

/// Result of tracking all objects over one section.
#[derive(Debug, Clone)]
pub struct SectionRun {
    /// One trajectory per object, in declaration order.
    pub trajectories: Vec<Trajectory>,
    pub frames_processed: usize,
    /// Cancellation stopped the run before the section end.
    pub cancelled: bool,
}

impl SectionRun {
    /// Whether the source ran out before the section end.
    pub fn is_short(&self, section: Section) -> bool {
        !self.cancelled && self.frames_processed < section.len()
    }
}

/// Track every object over `section`, reading each frame once.
///
/// Frames are processed strictly in order. A decode failure aborts the
/// whole run; running out of frames ends it early. Cancellation is checked
/// before every frame.
pub fn track_section(
    source: &mut dyn FrameSource,
    objects: &[TrackedObject],
    section: Section,
    fps: f64,
    options: &TrackingOptions,
    roi: Option<&Roi>,
    cancel: &CancelHandle,
) -> TrackingResult<SectionRun> {
    if !(fps > 0.0) || !fps.is_finite() {
        return Err(ConfigurationError::UnknownFps.into());
    }

    let mut trackers = objects
        .iter()
        .map(|object| ObjectTracker::new(object, options, roi))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(
        "[Tracker] Tracking {} object(s) with {} over frames {}..={}",
        trackers.len(),
        options.tracker,
        section.start,
        section.stop
    );

    source.seek(section.start)?;

    let mut frames_processed = 0usize;
    let mut cancelled = false;
    for expected in section.start..=section.stop {
        if cancel.is_cancelled() {
            tracing::warn!("[Tracker] Cancelled at frame {}", expected);
            cancelled = true;
            break;
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::warn!(
                    "[Tracker] Video ended at frame {} before section stop {}",
                    expected,
                    section.stop
                );
                break;
            }
            Err(e) => {
                tracing::error!("[Tracker] Frame source failed at frame {}: {}", expected, e);
                for tracker in &mut trackers {
                    tracker.fail(e.to_string());
                }
                return Err(TrackingError::Frame(e));
            }
        };

        let time_secs = (frame.index.saturating_sub(section.start)) as f64 / fps;
        for tracker in &mut trackers {
            tracker.process(frame.index, time_secs, &frame.image);
        }
        frames_processed += 1;

        if frames_processed % 100 == 0 {
            tracing::debug!("[Tracker] Processed {} frames", frames_processed);
        }
    }

    let trajectories: Vec<Trajectory> = trackers.into_iter().map(ObjectTracker::finish).collect();
    for trajectory in &trajectories {
        if trajectory.lost_count() > 0 {
            tracing::info!(
                "[Tracker] '{}': {} of {} samples lost",
                trajectory.object_name,
                trajectory.lost_count(),
                trajectory.len()
            );
        }
    }

    Ok(SectionRun {
        trajectories,
        frames_processed,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::TrackerKind;
    use super::*;
    use image::GrayImage;
    use crate::models::{Point, Rect, TrackingState};
    use crate::video::{Frame, FrameError, FrameResult, MemoryVideo, VideoProperties};

    fn options(tracker: TrackerKind) -> TrackingOptions {
        TrackingOptions {
            tracker,
            ..TrackingOptions::default()
        }
    }

    #[test]
    fn trajectory_covers_section_and_times_start_at_zero() {
        let object = texture(20, 20, 3);
        let frames = moving_scene(30, (160, 120), &object, (20, 20), (2, 1));
        let mut video = MemoryVideo::new(frames, 10.0);
        let objects = vec![TrackedObject::with_rectangle("a", object_rect(&object, 20 + 2 * 5, 20 + 5))];

        let run = track_section(
            &mut video,
            &objects,
            Section::new(5, 24),
            10.0,
            &options(TrackerKind::Kcf),
            None,
            &CancelHandle::new(),
        )
        .unwrap();

        let trajectory = &run.trajectories[0];
        assert_eq!(trajectory.len(), 20);
        assert_eq!(trajectory.samples[0].frame_index, 5);
        assert_eq!(trajectory.samples[0].time_secs, 0.0);
        assert!((trajectory.samples[19].time_secs - 1.9).abs() < 1e-12);
        assert!(!run.cancelled);
    }

    #[test]
    fn identical_inputs_give_identical_trajectories() {
        let object = texture(20, 20, 8);
        let frames = moving_scene(12, (120, 120), &object, (30, 30), (1, 2));
        let objects = vec![TrackedObject::with_point("p", Point::new(40.0, 40.0))];
        let run = || {
            let mut video = MemoryVideo::new(frames.clone(), 25.0);
            track_section(
                &mut video,
                &objects,
                Section::new(0, 11),
                25.0,
                &options(TrackerKind::MedianFlow),
                None,
                &CancelHandle::new(),
            )
            .unwrap()
            .trajectories
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn short_video_ends_early() {
        let object = texture(20, 20, 8);
        let mut video = MemoryVideo::new(moving_scene(6, (100, 100), &object, (30, 30), (1, 0)), 25.0);
        let objects = vec![TrackedObject::with_rectangle("a", object_rect(&object, 30, 30))];
        let section = Section::new(0, 9);
        let run = track_section(
            &mut video,
            &objects,
            section,
            25.0,
            &options(TrackerKind::Mosse),
            None,
            &CancelHandle::new(),
        )
        .unwrap();
        assert_eq!(run.trajectories[0].len(), 6);
        assert!(run.is_short(section));
    }

    #[test]
    fn cancelled_run_keeps_partial_series() {
        let object = texture(20, 20, 8);
        let mut video = MemoryVideo::new(moving_scene(10, (100, 100), &object, (30, 30), (1, 0)), 25.0);
        let objects = vec![TrackedObject::with_rectangle("a", object_rect(&object, 30, 30))];
        let cancel = CancelHandle::new();
        cancel.cancel();
        let run = track_section(
            &mut video,
            &objects,
            Section::new(0, 9),
            25.0,
            &options(TrackerKind::Mosse),
            None,
            &cancel,
        )
        .unwrap();
        assert!(run.cancelled);
        assert!(run.trajectories[0].is_empty());
    }

    #[test]
    fn rejects_unknown_fps() {
        let mut video = MemoryVideo::new(vec![GrayImage::new(10, 10)], 0.0);
        let objects = vec![TrackedObject::with_point("p", Point::new(5.0, 5.0))];
        let err = track_section(
            &mut video,
            &objects,
            Section::new(0, 0),
            0.0,
            &options(TrackerKind::Kcf),
            None,
            &CancelHandle::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TrackingError::Configuration(ConfigurationError::UnknownFps)));
    }

    struct BrokenSource {
        inner: MemoryVideo,
        fail_at: u32,
    }

    impl FrameSource for BrokenSource {
        fn properties(&self) -> &VideoProperties {
            self.inner.properties()
        }
        fn seek(&mut self, index: u32) -> FrameResult<()> {
            self.inner.seek(index)
        }
        fn next_frame(&mut self) -> FrameResult<Option<Frame>> {
            let frame = self.inner.next_frame()?;
            match frame {
                Some(f) if f.index == self.fail_at => Err(FrameError::DecodeFailed {
                    index: f.index,
                    message: "corrupt packet".to_string(),
                }),
                other => Ok(other),
            }
        }
        fn backend_name(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn decode_failure_fails_the_run() {
        let object = texture(20, 20, 8);
        let inner = MemoryVideo::new(moving_scene(10, (100, 100), &object, (30, 30), (1, 0)), 25.0);
        let mut source = BrokenSource { inner, fail_at: 4 };
        let objects = vec![TrackedObject::with_rectangle("a", Rect::new(30.0, 30.0, 20.0, 20.0))];
        let err = track_section(
            &mut source,
            &objects,
            Section::new(0, 9),
            25.0,
            &options(TrackerKind::Kcf),
            None,
            &CancelHandle::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TrackingError::Frame(FrameError::DecodeFailed { index: 4, .. })));
    }

    #[test]
    fn synthetic_diagonal_motion_is_monotonic() {
        // 500 frames, 20x20 box moving (10,10) -> (110,110).
        let object = texture(20, 20, 17);
        let frames: Vec<GrayImage> = (0..500)
            .map(|i| {
                let offset = (i as f64 * 100.0 / 499.0).round() as i64;
                scene(160, 160, &object, 10 + offset, 10 + offset)
            })
            .collect();
        let mut video = MemoryVideo::new(frames, 50.0);
        let objects = vec![TrackedObject::with_rectangle("box", Rect::new(10.0, 10.0, 20.0, 20.0))];
        let run = track_section(
            &mut video,
            &objects,
            Section::new(0, 499),
            50.0,
            &options(TrackerKind::Kcf),
            None,
            &CancelHandle::new(),
        )
        .unwrap();

        let trajectory = &run.trajectories[0];
        assert_eq!(trajectory.len(), 500);
        assert!(trajectory.samples.iter().all(|s| s.state == TrackingState::Tracked));
        for pair in trajectory.samples.windows(2) {
            assert!(pair[1].x >= pair[0].x - 0.5);
            assert!(pair[1].y >= pair[0].y - 0.5);
        }
        let last = trajectory.samples[499].position();
        assert!((last.x - 120.0).abs() < 1.5 && (last.y - 120.0).abs() < 1.5, "{:?}", last);
    }
}
