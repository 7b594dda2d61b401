use anyhow::Result;
use opencv as cv2;
use cv2::core::{self, Mat, Point, Size};
use cv2::prelude::*;
use cv2::{imgproc, video};
use tracing::trace;

/// Farneback parameters
const PYR_SCALE: f64 = 0.5;
const LEVELS: i32 = 3;
const WIN_SIZE: i32 = 10;
const ITERATIONS: i32 = 3;
const POLY_N: i32 = 5;
const POLY_SIGMA: f64 = 1.1;

const DILATE_KERNEL: i32 = 5;

/// Grayscale, histogram equalized copy of `frame`.
pub fn equalized_gray(frame: &Mat) -> Result<Mat> {
    let mut gray = Mat::default();
    match frame.channels() {
        1 => gray = frame.try_clone()?,
        4 => imgproc::cvt_color(frame, &mut gray, imgproc::COLOR_BGRA2GRAY, 0)?,
        _ => imgproc::cvt_color(frame, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?,
    }
    let mut equalized = Mat::default();
    imgproc::equalize_hist(&gray, &mut equalized)?;
    Ok(equalized)
}

/// Marks pixels whose dense optical flow between consecutive frames is large.
pub struct MotionEstimator {
    threshold: f64,
    previous: Option<Mat>,
    kernel: Mat,
}

impl MotionEstimator {
    pub fn new(threshold: f64) -> Result<Self> {
        let kernel = imgproc::get_structuring_element(
            imgproc::MORPH_RECT,
            Size::new(DILATE_KERNEL, DILATE_KERNEL),
            Point::new(-1, -1),
        )?;
        Ok(Self {
            threshold,
            previous: None,
            kernel,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Forget the previous frame, the next call is a warm-up again.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Returns the dilated binary motion mask of `gray` against the previous
    /// frame, or `None` when there is nothing to compare with yet. `gray` is
    /// kept as the previous frame either way.
    pub fn process(&mut self, gray: &Mat) -> Result<Option<Mat>> {
        let previous = match self.previous.take() {
            Some(previous) if previous.size()? == gray.size()? => previous,
            _ => {
                self.previous = Some(gray.try_clone()?);
                return Ok(None);
            }
        };

        let mut flow = Mat::default();
        video::calc_optical_flow_farneback(
            &previous,
            gray,
            &mut flow,
            PYR_SCALE,
            LEVELS,
            WIN_SIZE,
            ITERATIONS,
            POLY_N,
            POLY_SIGMA,
            0,
        )?;

        let mut components = core::Vector::<Mat>::new();
        core::split(&flow, &mut components)?;
        let mut magnitude = Mat::default();
        let mut angle = Mat::default();
        core::cart_to_polar(
            &components.get(0)?,
            &components.get(1)?,
            &mut magnitude,
            &mut angle,
            false,
        )?;

        let mut binary = Mat::default();
        imgproc::threshold(&magnitude, &mut binary, self.threshold, 255., imgproc::THRESH_BINARY)?;
        let mut binary_u8 = Mat::default();
        binary.convert_to(&mut binary_u8, core::CV_8U, 1., 0.)?;

        // over-include motion regions, the blob detector copes with the extra
        let mut mask = Mat::default();
        imgproc::dilate(
            &binary_u8,
            &mut mask,
            &self.kernel,
            Point::new(-1, -1),
            1,
            core::BORDER_CONSTANT,
            imgproc::morphology_default_border_value()?,
        )?;

        trace!("motion mask: {} moving pixels", core::count_non_zero(&mask)?);

        self.previous = Some(gray.try_clone()?);
        Ok(Some(mask))
    }
}
