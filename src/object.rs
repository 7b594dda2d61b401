use std::f64::consts::PI;
use std::fmt;

use serde::Serialize;

use crate::my_types::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A blob found in one frame. Has no identity and does not outlive the tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub position: Vector2i,
    /// diameter after scaling
    pub size: f64,
    pub area: f64,
}

impl Detection {
    /// Area is derived from the scaled diameter so that both stay consistent.
    pub fn from_diameter(x: i32, y: i32, size: f64) -> Self {
        Detection {
            position: Vector2i::new(x, y),
            size,
            area: PI * (size / 2.).powi(2),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackedObject {
    pub id: ObjectId,
    /// smoothed pixel position
    pub center: Vector2i,
    /// smoothed diameter
    pub size: f64,
    /// area of the last matched detection
    pub area: f64,
    pub age: u32,
    pub activity: f64,
}

impl TrackedObject {
    pub fn new(id: ObjectId, detection: &Detection) -> Self {
        TrackedObject {
            id,
            center: detection.position,
            size: detection.size,
            area: detection.area,
            age: 0,
            activity: 0.,
        }
    }

    /// Euclidean distance from the smoothed center to `point`.
    pub fn distance_to(&self, point: &Vector2i) -> f64 {
        (point.cast::<f64>() - self.center.cast::<f64>()).norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_area_follows_size() {
        let detection = Detection::from_diameter(3, 4, 10.);
        assert_eq!(detection.position, Vector2i::new(3, 4));
        assert!((detection.area - 25. * PI).abs() < 1e-9);
    }

    #[test]
    fn test_distance() {
        let object = TrackedObject::new(ObjectId(1), &Detection::from_diameter(0, 0, 4.));
        assert_eq!(object.distance_to(&Vector2i::new(3, 4)), 5.);
        assert_eq!(object.age, 0);
        assert_eq!(object.activity, 0.);
        assert_eq!(object.id.to_string(), "1");
    }
}
