use std::path::Path;

use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use log::{debug, info, warn};
use opencv as cv2;
use cv2::core::{Mat, Size};
use cv2::prelude::*;
use cv2::{imgproc, videoio};

use crate::config::OutputResolution;

/// Frames in source order. `None` marks the end of the stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Mat>>;

    /// Frame count if the source knows it up front.
    fn total_frames(&self) -> Option<usize>;
}

/// Receives one output frame per input frame, in order.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Mat) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoInfo {
    pub width: i32,
    pub height: i32,
    pub fps: f64,
    pub frame_count: Option<usize>,
}

/// Decodes a video file. The capture is released on drop.
pub struct VideoSource {
    capture: videoio::VideoCapture,
    info: VideoInfo,
}

impl VideoSource {
    pub fn open(path: &Path) -> Result<Self> {
        let name = path.to_str().ok_or(anyhow!("Video path is not valid UTF-8"))?;
        let capture = videoio::VideoCapture::from_file(name, videoio::CAP_ANY)
            .with_context(|| format!("Failed to open video: {}", path.display()))?;
        if !capture.is_opened()? {
            bail!("Failed to open video: {}", path.display());
        }

        let fps = capture.get(videoio::CAP_PROP_FPS)?;
        let frame_count = capture.get(videoio::CAP_PROP_FRAME_COUNT)?;
        let info = VideoInfo {
            width: capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32,
            height: capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32,
            fps: if fps > 0. { fps } else { 30. },
            frame_count: if frame_count > 0. { Some(frame_count as usize) } else { None },
        };
        info!(
            "opened {}: {}x{}, {:.1} fps, {:?} frames",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.frame_count
        );

        Ok(Self { capture, info })
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }
}

impl FrameSource for VideoSource {
    fn next_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        match self.capture.read(&mut frame) {
            Ok(true) if frame.rows() > 0 && frame.cols() > 0 => Ok(Some(frame)),
            Ok(_) => Ok(None),
            Err(err) => {
                // a frame that fails to decode ends the stream
                warn!("failed to decode frame: {}", err);
                Ok(None)
            }
        }
    }

    fn total_frames(&self) -> Option<usize> {
        self.info.frame_count
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        if let Err(err) = self.capture.release() {
            warn!("failed to release video capture: {}", err);
        }
    }
}

/// Encodes frames to a video file, resizing them to the writer size when
/// needed. The writer is released on drop.
pub struct VideoSink {
    writer: videoio::VideoWriter,
    size: Size,
    resized: Mat,
    frames_written: usize,
}

impl VideoSink {
    pub fn create(path: &Path, fourcc: [char; 4], fps: f64, size: (i32, i32)) -> Result<Self> {
        let name = path.to_str().ok_or(anyhow!("Output path is not valid UTF-8"))?;
        let code = videoio::VideoWriter::fourcc(fourcc[0], fourcc[1], fourcc[2], fourcc[3])?;
        let size = Size::new(size.0, size.1);
        let writer = videoio::VideoWriter::new(name, code, fps, size, true)
            .with_context(|| format!("Failed to create video writer: {}", path.display()))?;
        if !writer.is_opened()? {
            bail!("Failed to initialize video writer: {}", path.display());
        }
        info!(
            "writing {}: {}x{}, {:.1} fps, {}",
            path.display(),
            size.width,
            size.height,
            fps,
            fourcc.iter().collect::<String>()
        );

        Ok(Self {
            writer,
            size,
            resized: Mat::default(),
            frames_written: 0,
        })
    }

    /// Open a sink sized by `resolution` against the input `info`.
    pub fn for_input(
        path: &Path,
        fourcc: [char; 4],
        info: &VideoInfo,
        resolution: OutputResolution,
    ) -> Result<Self> {
        Self::create(path, fourcc, info.fps, resolution.resolve((info.width, info.height)))
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }
}

impl FrameSink for VideoSink {
    fn write_frame(&mut self, frame: &Mat) -> Result<()> {
        if frame.size()? == self.size {
            self.writer.write(frame)?;
        } else {
            imgproc::resize(frame, &mut self.resized, self.size, 0., 0., imgproc::INTER_LANCZOS4)?;
            self.writer.write(&self.resized)?;
        }
        self.frames_written += 1;
        Ok(())
    }
}

impl Drop for VideoSink {
    fn drop(&mut self) {
        debug!("releasing video writer after {} frames", self.frames_written);
        if let Err(err) = self.writer.release() {
            warn!("failed to release video writer: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_input_fails() {
        let result = VideoSource::open(Path::new("./does/not/exist.mp4"));
        assert!(result.is_err());
    }
}
