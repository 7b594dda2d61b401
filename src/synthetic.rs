use anyhow::Result;
use opencv as cv2;
use cv2::core::{Mat, Point, Scalar, CV_8UC3};
use cv2::imgproc;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::my_types::*;
use crate::video::FrameSource;

const MIN_RADIUS: i32 = 8;
const MAX_RADIUS: i32 = 24;
const MAX_SPEED: f64 = 6.;

#[derive(Debug, Clone)]
struct Disc {
    position: Vector2d,
    velocity: Vector2d,
    radius: i32,
}

/// Bright discs bouncing around a dark frame. The same seed gives the same
/// frames.
pub struct SyntheticSource {
    width: i32,
    height: i32,
    total: usize,
    produced: usize,
    discs: Vec<Disc>,
}

impl SyntheticSource {
    pub fn new(width: i32, height: i32, total: usize, disc_count: usize, seed: u64) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let discs = (0..disc_count)
            .map(|_| {
                let radius = rng.gen_range(MIN_RADIUS..=MAX_RADIUS);
                let margin = radius as f64;
                Disc {
                    position: Vector2d::new(
                        rng.gen_range(margin..(width as f64 - margin).max(margin + 1.)),
                        rng.gen_range(margin..(height as f64 - margin).max(margin + 1.)),
                    ),
                    velocity: Vector2d::new(
                        rng.gen_range(-MAX_SPEED..MAX_SPEED),
                        rng.gen_range(-MAX_SPEED..MAX_SPEED),
                    ),
                    radius,
                }
            })
            .collect();

        Self {
            width,
            height,
            total,
            produced: 0,
            discs,
        }
    }

    pub fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    fn step(&mut self) {
        let bounds = Vector2d::new(self.width as f64, self.height as f64);
        for disc in self.discs.iter_mut() {
            disc.position += disc.velocity;
            for axis in 0..2 {
                let r = disc.radius as f64;
                if disc.position[axis] < r || disc.position[axis] > bounds[axis] - r {
                    disc.velocity[axis] = -disc.velocity[axis];
                    disc.position[axis] = disc.position[axis].clamp(r, (bounds[axis] - r).max(r));
                }
            }
        }
    }

    fn draw(&self) -> Result<Mat> {
        let mut frame = Mat::new_rows_cols_with_default(self.height, self.width, CV_8UC3, Scalar::all(0.))?;
        for disc in &self.discs {
            imgproc::circle(
                &mut frame,
                Point::new(disc.position.x as i32, disc.position.y as i32),
                disc.radius,
                Scalar::new(255., 255., 255., 0.),
                -1,
                imgproc::LINE_AA,
                0,
            )?;
        }
        Ok(frame)
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Mat>> {
        if self.produced >= self.total {
            return Ok(None);
        }
        if self.produced > 0 {
            self.step();
        }
        self.produced += 1;
        Ok(Some(self.draw()?))
    }

    fn total_frames(&self) -> Option<usize> {
        Some(self.total)
    }
}
