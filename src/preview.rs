use std::path::Path;
use std::thread::{self, JoinHandle};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use opencv as cv2;
use cv2::prelude::*;
use rerun::{RecordingStream, RecordingStreamBuilder};
use tracing::{debug, trace, warn};

use crate::object::TrackedObject;
use crate::pipeline::TickObserver;
use crate::visualization::bgr_to_rgb_array;

/// Snapshot handed to the presentation side.
pub struct Preview {
    pub frame_index: usize,
    pub total_frames: Option<usize>,
    pub frame: cv2::core::Mat,
    pub objects: Vec<TrackedObject>,
}

impl Preview {
    /// Completed fraction of the run, if the total is known.
    pub fn progress(&self) -> Option<f64> {
        self.total_frames
            .filter(|total| *total > 0)
            .map(|total| self.frame_index as f64 / total as f64)
    }
}

/// Publishes a preview every `interval` frames without ever blocking the
/// pipeline. Previews that do not fit in the channel are dropped.
pub struct PreviewPublisher {
    sender: Sender<Preview>,
    interval: usize,
    published: usize,
    dropped: usize,
}

impl PreviewPublisher {
    pub fn channel(interval: usize, capacity: usize) -> (Self, Receiver<Preview>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let publisher = Self {
            sender,
            interval: interval.max(1),
            published: 0,
            dropped: 0,
        };
        (publisher, receiver)
    }

    pub fn is_due(&self, frame_index: usize) -> bool {
        frame_index % self.interval == 0
    }

    /// Returns whether the preview was accepted.
    pub fn publish(&mut self, preview: Preview) -> bool {
        match self.sender.try_send(preview) {
            Ok(()) => {
                self.published += 1;
                true
            }
            Err(TrySendError::Full(preview)) | Err(TrySendError::Disconnected(preview)) => {
                trace!("dropped preview for frame {}", preview.frame_index);
                self.dropped += 1;
                false
            }
        }
    }

    pub fn published(&self) -> usize {
        self.published
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl TickObserver for PreviewPublisher {
    fn on_tick(
        &mut self,
        frame_index: usize,
        total_frames: Option<usize>,
        frame: &cv2::core::Mat,
        objects: &[TrackedObject],
    ) -> Result<()> {
        if !self.is_due(frame_index) {
            return Ok(());
        }
        self.publish(Preview {
            frame_index,
            total_frames,
            frame: frame.try_clone()?,
            objects: objects.to_vec(),
        });
        Ok(())
    }
}

/// Writes previews into a rerun recording file.
pub struct RerunRecorder {
    recorder: RecordingStream,
}

impl RerunRecorder {
    pub fn save(path: &Path) -> Result<Self> {
        let recorder = RecordingStreamBuilder::new("motion-blobs").save(path)?;
        Ok(Self { recorder })
    }

    pub fn log(&self, preview: &Preview) -> Result<()> {
        self.recorder
            .set_time_sequence("frame", preview.frame_index as i64);
        self.recorder.log(
            "video/annotated",
            &rerun::Image::try_from(bgr_to_rgb_array(&preview.frame)?)?,
        )?;

        let objects = &preview.objects;
        self.recorder.log(
            "video/objects",
            &rerun::Points2D::new(
                objects
                    .iter()
                    .map(|o| (o.center.x as f32, o.center.y as f32)),
            )
            .with_radii(objects.iter().map(|o| (o.size / 2.) as f32))
            .with_labels(objects.iter().map(|o| format!("#{}", o.id))),
        )?;
        Ok(())
    }

    /// Drain `receiver` on a background thread until every publisher is gone.
    /// Returns the number of previews written.
    pub fn spawn(self, receiver: Receiver<Preview>) -> JoinHandle<usize> {
        thread::spawn(move || {
            let mut written = 0;
            for preview in receiver.iter() {
                match self.log(&preview) {
                    Ok(()) => written += 1,
                    Err(err) => warn!("failed to record preview {}: {}", preview.frame_index, err),
                }
            }
            debug!("preview recorder finished after {} previews", written);
            written
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv2::core::{Mat, Scalar, CV_8UC3};

    fn frame() -> Mat {
        Mat::new_rows_cols_with_default(4, 4, CV_8UC3, Scalar::all(0.)).unwrap()
    }

    #[test]
    fn test_publishes_on_interval() {
        let (mut publisher, receiver) = PreviewPublisher::channel(10, 8);
        for i in 1..=30 {
            publisher.on_tick(i, Some(30), &frame(), &[]).unwrap();
        }
        let indices: Vec<usize> = receiver.try_iter().map(|p| p.frame_index).collect();
        assert_eq!(indices, vec![10, 20, 30]);
        assert_eq!(publisher.published(), 3);
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (mut publisher, receiver) = PreviewPublisher::channel(1, 1);
        for i in 1..=5 {
            publisher.on_tick(i, None, &frame(), &[]).unwrap();
        }
        assert_eq!(publisher.published(), 1);
        assert_eq!(publisher.dropped(), 4);
        assert_eq!(receiver.try_recv().unwrap().frame_index, 1);
    }

    #[test]
    fn test_disconnected_receiver_is_harmless() {
        let (mut publisher, receiver) = PreviewPublisher::channel(1, 1);
        drop(receiver);
        publisher.on_tick(1, None, &frame(), &[]).unwrap();
        assert_eq!(publisher.dropped(), 1);
    }

    #[test]
    fn test_progress() {
        let preview = Preview {
            frame_index: 25,
            total_frames: Some(100),
            frame: frame(),
            objects: vec![],
        };
        assert_eq!(preview.progress(), Some(0.25));
        let unknown = Preview { total_frames: None, ..preview };
        assert_eq!(unknown.progress(), None);
    }
}
