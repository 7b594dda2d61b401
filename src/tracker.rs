use tracing::debug;

use crate::object::*;

/// Age stops growing here.
pub const MAX_AGE: u32 = 50;
/// Activity stops growing here.
pub const MAX_ACTIVITY: f64 = 200.;
/// Objects at `MAX_AGE` must have gathered more activity than this to be kept.
pub const MIN_ACTIVITY: f64 = 5.;

const GATE_BASE: f64 = 50.;
const GATE_SIZE_FACTOR: f64 = 0.2;
const POSITION_WEIGHT: f64 = 0.5;
const SIZE_WEIGHT: f64 = 0.6;
const ACTIVITY_GAIN: f64 = 0.3;

/// Counts of what happened during one `ObjectTracker::update`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub matched: usize,
    pub created: usize,
    /// previous objects that did not make it into the new table
    pub evicted: usize,
}

/// Maximum center displacement for a detection of `size` to continue an object.
pub fn match_gate(size: f64) -> f64 {
    GATE_BASE + size * GATE_SIZE_FACTOR
}

/// Greedy nearest-neighbour tracker.
///
/// The table keeps insertion order from the tick that produced it, and matching
/// scans it in that order taking the first object inside the gate. This is
/// first-fit, so a detection can bind to a farther object that comes earlier in
/// the table even if a closer one also qualifies.
#[derive(Debug, Default)]
pub struct ObjectTracker {
    objects: Vec<TrackedObject>,
    /// last id handed out, 0 before the first object
    last_id: u64,
}

impl ObjectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn objects(&self) -> &[TrackedObject] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Total number of objects ever created by this tracker.
    pub fn total_created(&self) -> u64 {
        self.last_id
    }

    /// Replace the table with the result of matching `detections` against it.
    pub fn update(&mut self, detections: &[Detection]) -> UpdateSummary {
        let mut summary = UpdateSummary::default();
        let mut updated: Vec<TrackedObject> = Vec::with_capacity(self.objects.len());

        for detection in dedup_by_position(detections) {
            let candidate = self
                .objects
                .iter()
                .map(|object| (object, object.distance_to(&detection.position)))
                .find(|(_, distance)| *distance < match_gate(detection.size));

            let object = match candidate {
                Some((previous, distance)) => {
                    summary.matched += 1;
                    smooth(previous, &detection, distance)
                }
                None => {
                    summary.created += 1;
                    self.last_id += 1;
                    TrackedObject::new(ObjectId(self.last_id), &detection)
                }
            };

            // several detections may land on the same object, the last one wins
            match updated.iter_mut().find(|o| o.id == object.id) {
                Some(slot) => *slot = object,
                None => updated.push(object),
            }
        }

        updated.retain(|o| o.age < MAX_AGE || o.activity > MIN_ACTIVITY);

        let previous_ids = self.objects.iter().map(|o| o.id);
        summary.evicted = previous_ids
            .filter(|id| !updated.iter().any(|o| o.id == *id))
            .count();

        debug!(
            "tracker: {} detections, {} matched, {} created, {} evicted, {} objects",
            detections.len(),
            summary.matched,
            summary.created,
            summary.evicted,
            updated.len()
        );

        self.objects = updated;
        summary
    }

    #[cfg(test)]
    pub fn with_objects(objects: Vec<TrackedObject>) -> Self {
        let last_id = objects.iter().map(|o| o.id.0).max().unwrap_or(0);
        Self { objects, last_id }
    }
}

/// Detections sharing a pixel position collapse into one. The later detection's
/// values replace the earlier ones but keep the earlier slot in the order.
fn dedup_by_position(detections: &[Detection]) -> Vec<Detection> {
    let mut unique: Vec<Detection> = Vec::with_capacity(detections.len());
    for detection in detections {
        match unique.iter_mut().find(|d| d.position == detection.position) {
            Some(slot) => *slot = *detection,
            None => unique.push(*detection),
        }
    }
    unique
}

/// New state of `previous` after being matched with `detection` at `distance`.
fn smooth(previous: &TrackedObject, detection: &Detection, distance: f64) -> TrackedObject {
    let center = (detection.position.cast::<f64>() * POSITION_WEIGHT
        + previous.center.cast::<f64>() * (1. - POSITION_WEIGHT))
        .map(|v| v.trunc() as i32);

    TrackedObject {
        id: previous.id,
        center,
        size: SIZE_WEIGHT * detection.size + (1. - SIZE_WEIGHT) * previous.size,
        area: detection.area,
        age: (previous.age + 1).min(MAX_AGE),
        activity: (previous.activity + ACTIVITY_GAIN * distance).min(MAX_ACTIVITY),
    }
}
