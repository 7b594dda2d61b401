use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use opencv::core::Mat;
use tracing::{debug, info, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::blob::BlobDetector;
use crate::config::Config;
use crate::motion::{equalized_gray, MotionEstimator};
use crate::object::{Detection, TrackedObject};
use crate::tracker::{ObjectTracker, UpdateSummary};
use crate::video::{FrameSink, FrameSource};
use crate::visualization::Renderer;

/// Receives every finished tick. Called only after the tracker table and the
/// rendered frame for that tick are complete.
pub trait TickObserver {
    fn on_tick(
        &mut self,
        frame_index: usize,
        total_frames: Option<usize>,
        frame: &Mat,
        objects: &[TrackedObject],
    ) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Result of one frame going through the pipeline.
pub struct Tick {
    pub frame: Mat,
    pub detections: Vec<Detection>,
    pub summary: UpdateSummary,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: usize,
    pub objects_created: u64,
    pub cancelled: bool,
}

pub struct Pipeline {
    motion: MotionEstimator,
    blobs: BlobDetector,
    tracker: ObjectTracker,
    renderer: Renderer,
    // Incremented just before processing a new frame. 0 before the first frame.
    frame_number: usize,
}

impl Pipeline {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            motion: MotionEstimator::new(config.motion_threshold)?,
            blobs: BlobDetector::new(config.min_area, config.blob_size_scale)?,
            tracker: ObjectTracker::new(),
            renderer: Renderer::new(config.max_connection_distance as f64, config.trail_opacity),
            frame_number: 0,
        })
    }

    pub fn tracker(&self) -> &ObjectTracker {
        &self.tracker
    }

    pub fn frame_number(&self) -> usize {
        self.frame_number
    }

    /// Detect, track and render one frame.
    pub fn process_frame(&mut self, frame: &Mat, total_frames: Option<usize>) -> Result<Tick> {
        self.frame_number += 1;

        let gray = equalized_gray(frame)?;
        let detections = match self.motion.process(&gray)? {
            Some(mask) => self.blobs.detect(&gray, &mask)?,
            None => vec![],
        };
        let summary = self.tracker.update(&detections);
        let rendered = self.renderer.render(
            frame,
            self.tracker.objects(),
            self.frame_number,
            total_frames,
        )?;

        Ok(Tick {
            frame: rendered,
            detections,
            summary,
        })
    }

    /// Pump every frame of `source` through the pipeline into `sink`.
    /// `cancel` is checked between frames.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        observers: &mut [&mut dyn TickObserver],
        cancel: &AtomicBool,
    ) -> Result<RunSummary> {
        let total_frames = source.total_frames();
        let mut summary = RunSummary::default();

        loop {
            if cancel.load(Ordering::Relaxed) {
                info!("cancelled after {} frames", summary.frames);
                summary.cancelled = true;
                break;
            }
            let frame = match source.next_frame()? {
                Some(frame) => frame,
                None => break,
            };

            let tick = self.process_frame(&frame, total_frames)?;
            sink.write_frame(&tick.frame)?;
            summary.frames += 1;
            Span::current().pb_inc(1);

            debug!(
                "frame {}: {} detections, {} objects",
                self.frame_number,
                tick.detections.len(),
                self.tracker.len()
            );
            for observer in observers.iter_mut() {
                observer.on_tick(self.frame_number, total_frames, &tick.frame, self.tracker.objects())?;
            }
        }

        for observer in observers.iter_mut() {
            observer.finish()?;
        }
        summary.objects_created = self.tracker.total_created();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticSource;
    use crate::tracker::{MAX_ACTIVITY, MAX_AGE};
    use opencv::core::{Scalar, CV_8UC3};
    use opencv::prelude::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct CollectSink {
        frames: Vec<Mat>,
    }

    impl FrameSink for CollectSink {
        fn write_frame(&mut self, frame: &Mat) -> Result<()> {
            self.frames.push(frame.try_clone()?);
            Ok(())
        }
    }

    /// Same black frame over and over.
    struct StillSource {
        left: usize,
    }

    impl FrameSource for StillSource {
        fn next_frame(&mut self) -> Result<Option<Mat>> {
            if self.left == 0 {
                return Ok(None);
            }
            self.left -= 1;
            Ok(Some(Mat::new_rows_cols_with_default(120, 160, CV_8UC3, Scalar::all(0.))?))
        }

        fn total_frames(&self) -> Option<usize> {
            None
        }
    }

    #[derive(Default)]
    struct Bounds {
        ticks: usize,
        finished: bool,
    }

    impl TickObserver for Bounds {
        fn on_tick(&mut self, frame_index: usize, _: Option<usize>, _: &Mat, objects: &[TrackedObject]) -> Result<()> {
            self.ticks += 1;
            assert_eq!(frame_index, self.ticks);
            for object in objects {
                assert!(object.age <= MAX_AGE);
                assert!(object.activity >= 0. && object.activity <= MAX_ACTIVITY);
            }
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    #[test]
    fn test_warm_up_tick_is_empty() {
        let mut pipeline = Pipeline::new(&Config::default()).unwrap();
        let mut source = SyntheticSource::new(160, 120, 1, 3, 1);
        let frame = source.next_frame().unwrap().unwrap();
        let tick = pipeline.process_frame(&frame, Some(1)).unwrap();
        assert!(tick.detections.is_empty());
        assert!(pipeline.tracker().is_empty());
        assert_eq!(pipeline.frame_number(), 1);
        assert_eq!(tick.frame.size().unwrap(), frame.size().unwrap());
    }

    #[test]
    fn test_one_output_frame_per_input() {
        let mut pipeline = Pipeline::new(&Config::default()).unwrap();
        let mut source = SyntheticSource::new(160, 120, 12, 3, 5);
        let mut sink = CollectSink::default();
        let mut bounds = Bounds::default();
        let cancel = AtomicBool::new(false);

        let summary = pipeline
            .run(&mut source, &mut sink, &mut [&mut bounds], &cancel)
            .unwrap();

        assert_eq!(summary.frames, 12);
        assert!(!summary.cancelled);
        assert_eq!(sink.frames.len(), 12);
        assert_eq!(bounds.ticks, 12);
        assert!(bounds.finished);
        assert_eq!(summary.objects_created, pipeline.tracker().total_created());
    }

    #[test]
    fn test_still_video_tracks_nothing() {
        let mut pipeline = Pipeline::new(&Config::default()).unwrap();
        let mut sink = CollectSink::default();
        let cancel = AtomicBool::new(false);
        let summary = pipeline
            .run(&mut StillSource { left: 20 }, &mut sink, &mut [], &cancel)
            .unwrap();
        assert_eq!(summary.frames, 20);
        assert_eq!(summary.objects_created, 0);
        assert!(pipeline.tracker().is_empty());
    }

    #[test]
    fn test_cancel_stops_before_next_frame() {
        let mut pipeline = Pipeline::new(&Config::default()).unwrap();
        let mut sink = CollectSink::default();
        let cancel = AtomicBool::new(true);
        let summary = pipeline
            .run(&mut StillSource { left: 5 }, &mut sink, &mut [], &cancel)
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.frames, 0);
        assert!(sink.frames.is_empty());
    }

    /// Raises the shared flag from outside the loop once `after` ticks are done.
    struct StopAfter {
        after: usize,
        flag: Arc<AtomicBool>,
    }

    impl TickObserver for StopAfter {
        fn on_tick(&mut self, frame_index: usize, _: Option<usize>, _: &Mat, _: &[TrackedObject]) -> Result<()> {
            if frame_index == self.after {
                self.flag.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[test]
    fn test_cancel_mid_run_finishes_current_tick() {
        let mut pipeline = Pipeline::new(&Config::default()).unwrap();
        let mut sink = CollectSink::default();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut stop = StopAfter {
            after: 3,
            flag: cancel.clone(),
        };
        let mut bounds = Bounds::default();

        let summary = pipeline
            .run(&mut StillSource { left: 10 }, &mut sink, &mut [&mut stop, &mut bounds], &cancel)
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.frames, 3);
        assert_eq!(sink.frames.len(), 3);
        assert_eq!(bounds.ticks, 3);
        assert!(bounds.finished);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.min_area = 0.;
        assert!(Pipeline::new(&config).is_err());
    }
}
