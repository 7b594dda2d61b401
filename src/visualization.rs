use std::collections::VecDeque;

use cv2::prelude::*;
use opencv as cv2;

use anyhow::Result;
use ndarray as nd;

use crate::object::TrackedObject;

pub const TRAIL_LENGTH: usize = 5;

const WHITE: (f64, f64, f64) = (255., 255., 255.);
const BLACK: (f64, f64, f64) = (0., 0., 0.);
const GRAY: (f64, f64, f64) = (180., 180., 180.);
const FONT: i32 = cv2::imgproc::FONT_HERSHEY_SIMPLEX;
const FONT_SCALE: f64 = 0.4;
const LINE_THICKNESS: i32 = 1;
const CIRCLE_THICKNESS: i32 = 2;
const SHADOW_OFFSET: i32 = 2;
/// weight of the annotated frame against the trail
const OVERLAY_WEIGHT: f64 = 0.7;

fn color((b, g, r): (f64, f64, f64)) -> cv2::core::Scalar {
    cv2::core::Scalar::new(b, g, r, 0.0)
}

pub trait AsArray {
    fn try_as_array(&self) -> Result<nd::Array3<u8>>;
}

impl AsArray for cv2::core::Mat {
    fn try_as_array(&self) -> Result<nd::Array3<u8>> {
        let bytes = self.data_bytes()?;
        let size = self.size()?;
        let a = nd::ArrayView3::from_shape((size.height as usize, size.width as usize, 3), bytes)?;
        Ok(a.to_owned())
    }
}

/// RGB copy of a BGR frame as an ndarray.
pub fn bgr_to_rgb_array(frame: &cv2::core::Mat) -> Result<nd::Array3<u8>> {
    let mut rgb = cv2::core::Mat::default();
    cv2::imgproc::cvt_color(frame, &mut rgb, cv2::imgproc::COLOR_BGR2RGB, 0)?;
    rgb.try_as_array()
}

/// The last few raw frames, oldest first.
#[derive(Debug)]
pub struct TrailBuffer {
    frames: VecDeque<cv2::core::Mat>,
    capacity: usize,
}

impl TrailBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push(&mut self, frame: &cv2::core::Mat) -> Result<()> {
        if let Some(last) = self.frames.back() {
            if last.size()? != frame.size()? || last.typ() != frame.typ() {
                self.frames.clear();
            }
        }
        self.frames.push_back(frame.try_clone()?);
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
        Ok(())
    }

    /// Blend of the buffered frames where newer frames weigh more.
    pub fn composite(&self, opacity: f64) -> Result<cv2::core::Mat> {
        let first = match self.frames.front() {
            Some(first) => first,
            None => return Ok(cv2::core::Mat::default()),
        };
        let mut trail = cv2::core::Mat::new_rows_cols_with_default(
            first.rows(),
            first.cols(),
            first.typ(),
            cv2::core::Scalar::all(0.),
        )?;
        let len = self.frames.len() as f64;
        for (i, past) in self.frames.iter().enumerate() {
            let alpha = opacity * (i + 1) as f64 / len;
            let mut blended = cv2::core::Mat::default();
            cv2::core::add_weighted(&trail, 1. - alpha, past, alpha, 0., &mut blended, -1)?;
            trail = blended;
        }
        Ok(trail)
    }
}

/// Index pairs of objects whose centers are closer than `max_distance`.
pub fn connections(objects: &[TrackedObject], max_distance: f64) -> Vec<(usize, usize)> {
    let mut pairs = vec![];
    for (i, a) in objects.iter().enumerate() {
        for (j, b) in objects.iter().enumerate().skip(i + 1) {
            if a.distance_to(&b.center) < max_distance {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

pub fn status_line(object_count: usize, frame_index: usize, total_frames: Option<usize>) -> String {
    let total = total_frames.map_or("?".to_string(), |t| t.to_string());
    format!("Blobs: {} | Frame: {}/{}", object_count, frame_index, total)
}

/// Draws the tracked objects over each frame and blends in a short trail.
pub struct Renderer {
    trail: TrailBuffer,
    max_connection_distance: f64,
    trail_opacity: f64,
}

impl Renderer {
    pub fn new(max_connection_distance: f64, trail_opacity: f64) -> Self {
        Self {
            trail: TrailBuffer::new(TRAIL_LENGTH),
            max_connection_distance,
            trail_opacity,
        }
    }

    pub fn trail(&self) -> &TrailBuffer {
        &self.trail
    }

    pub fn render(
        &mut self,
        frame: &cv2::core::Mat,
        objects: &[TrackedObject],
        frame_index: usize,
        total_frames: Option<usize>,
    ) -> Result<cv2::core::Mat> {
        self.trail.push(frame)?;
        let trail = self.trail.composite(self.trail_opacity)?;

        let mut annotated = frame.try_clone()?;
        for (i, j) in connections(objects, self.max_connection_distance) {
            let p1 = to_point(&objects[i]);
            let p2 = to_point(&objects[j]);
            cv2::imgproc::line(&mut annotated, p1, p2, color(GRAY), LINE_THICKNESS, cv2::imgproc::LINE_8, 0)?;
            cv2::imgproc::line(
                &mut annotated,
                offset(p1, 1),
                offset(p2, 1),
                color(WHITE),
                LINE_THICKNESS,
                cv2::imgproc::LINE_8,
                0,
            )?;
        }
        for object in objects {
            draw_object(&mut annotated, object)?;
        }

        let mut output = cv2::core::Mat::default();
        cv2::core::add_weighted(
            &annotated,
            OVERLAY_WEIGHT,
            &trail,
            1. - OVERLAY_WEIGHT,
            0.,
            &mut output,
            -1,
        )?;

        let status = status_line(objects.len(), frame_index, total_frames);
        let status_size = text_size(&status)?;
        fill_box(
            &mut output,
            cv2::core::Point::new(5, 5),
            cv2::core::Point::new(15 + status_size.width, 15 + status_size.height),
            color(BLACK),
        )?;
        put_text(
            &mut output,
            &status,
            cv2::core::Point::new(10, 10 + status_size.height),
            color(WHITE),
        )?;

        Ok(output)
    }
}

fn to_point(object: &TrackedObject) -> cv2::core::Point {
    cv2::core::Point::new(object.center.x, object.center.y)
}

fn offset(point: cv2::core::Point, by: i32) -> cv2::core::Point {
    cv2::core::Point::new(point.x + by, point.y + by)
}

fn draw_object(frame: &mut cv2::core::Mat, object: &TrackedObject) -> Result<()> {
    let center = to_point(object);
    let radius = (object.size / 2.) as i32;
    cv2::imgproc::circle(frame, offset(center, SHADOW_OFFSET), radius, color(GRAY), CIRCLE_THICKNESS, cv2::imgproc::LINE_8, 0)?;
    cv2::imgproc::circle(frame, center, radius, color(WHITE), CIRCLE_THICKNESS, cv2::imgproc::LINE_8, 0)?;

    let label = format!("#{}", object.id);
    let label_size = text_size(&label)?;
    let origin = cv2::core::Point::new(
        (object.center.x as f64 + object.size / 2. + 5.) as i32,
        object.center.y,
    );
    fill_box(
        frame,
        cv2::core::Point::new(origin.x - 3, origin.y - label_size.height - 3),
        cv2::core::Point::new(origin.x + label_size.width + 3, origin.y + 3),
        color(BLACK),
    )?;
    put_text(frame, &label, offset(origin, 1), color(GRAY))?;
    put_text(frame, &label, origin, color(WHITE))?;
    Ok(())
}

fn text_size(text: &str) -> Result<cv2::core::Size> {
    let mut baseline = 0;
    Ok(cv2::imgproc::get_text_size(text, FONT, FONT_SCALE, LINE_THICKNESS, &mut baseline)?)
}

fn put_text(
    frame: &mut cv2::core::Mat,
    text: &str,
    origin: cv2::core::Point,
    color: cv2::core::Scalar,
) -> Result<()> {
    cv2::imgproc::put_text(
        frame,
        text,
        origin,
        FONT,
        FONT_SCALE,
        color,
        LINE_THICKNESS,
        cv2::imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

/// Filled rectangle with both corners inclusive.
fn fill_box(
    frame: &mut cv2::core::Mat,
    top_left: cv2::core::Point,
    bottom_right: cv2::core::Point,
    color: cv2::core::Scalar,
) -> Result<()> {
    let rect = cv2::core::Rect::new(
        top_left.x,
        top_left.y,
        bottom_right.x - top_left.x + 1,
        bottom_right.y - top_left.y + 1,
    );
    cv2::imgproc::rectangle(frame, rect, color, -1, cv2::imgproc::LINE_8, 0)?;
    Ok(())
}
