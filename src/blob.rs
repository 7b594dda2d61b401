use anyhow::Result;
use opencv as cv2;
use cv2::core::{self, KeyPoint, Mat, Ptr, Size};
use cv2::features2d::{SimpleBlobDetector, SimpleBlobDetector_Params};
use cv2::imgproc;
use cv2::prelude::*;

use crate::object::Detection;

const MIN_THRESHOLD: f32 = 5.;
const MAX_THRESHOLD: f32 = 250.;
const MAX_AREA: f32 = 25000.;
const BLUR_KERNEL: i32 = 5;

fn detector_params(min_area: f32) -> Result<SimpleBlobDetector_Params> {
    let mut params = SimpleBlobDetector_Params::default()?;
    params.min_threshold = MIN_THRESHOLD;
    params.max_threshold = MAX_THRESHOLD;
    params.filter_by_area = true;
    params.min_area = min_area;
    params.max_area = MAX_AREA;
    // accept any shape, only bright regions
    params.filter_by_circularity = false;
    params.filter_by_convexity = false;
    params.filter_by_inertia = false;
    // OpenCV defaults to dark blobs, motion shows up bright after masking
    params.filter_by_color = true;
    params.blob_color = 255;
    Ok(params)
}

/// Finds blobs inside the moving part of a frame.
pub struct BlobDetector {
    detector: Ptr<SimpleBlobDetector>,
    min_area: f32,
    size_scale: f64,
}

impl BlobDetector {
    pub fn new(min_area: f32, size_scale: f64) -> Result<Self> {
        Ok(Self {
            detector: SimpleBlobDetector::create(detector_params(min_area)?)?,
            min_area,
            size_scale,
        })
    }

    pub fn min_area(&self) -> f32 {
        self.min_area
    }

    /// Rebuild the underlying detector with a new minimum blob area.
    pub fn set_min_area(&mut self, min_area: f32) -> Result<()> {
        self.detector = SimpleBlobDetector::create(detector_params(min_area)?)?;
        self.min_area = min_area;
        Ok(())
    }

    /// Detect blobs in `gray` restricted to the non-zero pixels of `mask`.
    pub fn detect(&mut self, gray: &Mat, mask: &Mat) -> Result<Vec<Detection>> {
        if gray.rows() == 0 || gray.cols() == 0 {
            return Ok(vec![]);
        }

        let mut masked = Mat::default();
        core::bitwise_and(gray, gray, &mut masked, mask)?;
        // pixel noise otherwise shows up as tiny blobs
        let mut blurred = Mat::default();
        imgproc::gaussian_blur(
            &masked,
            &mut blurred,
            Size::new(BLUR_KERNEL, BLUR_KERNEL),
            0.,
            0.,
            core::BORDER_DEFAULT,
        )?;

        let mut keypoints = core::Vector::<KeyPoint>::new();
        self.detector.detect(&blurred, &mut keypoints, &Mat::default())?;

        Ok(keypoints
            .iter()
            .filter_map(|kp| {
                let pt = kp.pt();
                to_detection(pt.x, pt.y, kp.size(), self.size_scale)
            })
            .collect())
    }
}

/// Keypoints with a non-finite position or a non-positive diameter are dropped.
fn to_detection(x: f32, y: f32, diameter: f32, size_scale: f64) -> Option<Detection> {
    if !x.is_finite() || !y.is_finite() || !diameter.is_finite() || diameter <= 0. {
        return None;
    }
    let size = diameter as f64 * size_scale;
    if !(size > 0.) {
        return None;
    }
    Some(Detection::from_diameter(x as i32, y as i32, size))
}
