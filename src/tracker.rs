use nalgebra::{Point2, Vector2};
use std::time::Instant;

use crate::config::TrackerConfig;
use crate::distance::UNKNOWN_DISTANCE;
use crate::motion::MotionState;

/// Identity handed out by the [`Tracker`]. Never reused.
pub type ObjectId = u64;

/// An object the tracker is currently following.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub id: ObjectId,
    /// Last matched centroid.
    pub position: Point2<f32>,
    /// Pixels per second.
    pub velocity: Vector2<f32>,
    pub last_update: Instant,
    /// Consecutive frames without a match.
    pub lost_frames: u32,
    pub motion_state: MotionState,
    /// Metres, or [`UNKNOWN_DISTANCE`].
    pub distance: f32,
}

impl TrackedObject {
    fn new(id: ObjectId, position: Point2<f32>, now: Instant) -> Self {
        TrackedObject {
            id,
            position,
            velocity: Vector2::zeros(),
            last_update: now,
            lost_frames: 0,
            motion_state: MotionState::Static,
            distance: UNKNOWN_DISTANCE,
        }
    }

    /// Position extrapolated with the current velocity.
    pub fn predict(&self, now: Instant) -> Point2<f32> {
        let dt = now.saturating_duration_since(self.last_update).as_secs_f32();
        self.position + self.velocity * dt
    }

    fn update(&mut self, position: Point2<f32>, now: Instant, smoothing: f32) {
        let dt = now.saturating_duration_since(self.last_update).as_secs_f32();
        if dt > 0.0 {
            let observed = (position - self.position) / dt;
            self.velocity = self.velocity * smoothing + observed * (1.0 - smoothing);
        }
        self.position = position;
        self.last_update = now;
        self.lost_frames = 0;
    }
}

/// Result of one tracker step for a matched or newly created object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackUpdate {
    pub id: ObjectId,
    pub position: Point2<f32>,
    /// Index into the detections passed to [`Tracker::update`].
    pub detection: usize,
}

/// Predictive nearest-neighbour centroid tracker.
///
/// Matching is greedy: objects are visited in identity order and each takes the
/// closest unused detection within `max_distance` of its predicted position.
/// Crossing trajectories can swap identities. Cost is O(objects x detections).
pub struct Tracker {
    config: TrackerConfig,
    /// Kept sorted by id, which is also insertion order.
    objects: Vec<TrackedObject>,
    next_id: ObjectId,
    pruned: Vec<ObjectId>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Tracker {
            config,
            objects: Vec::new(),
            next_id: 0,
            pruned: Vec::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: TrackerConfig) {
        self.config = config;
    }

    /// Step the tracker using the wall clock.
    pub fn update(&mut self, detections: &[Point2<f32>]) -> Vec<TrackUpdate> {
        self.update_at(detections, Instant::now())
    }

    /// Step the tracker with detections observed at `now`.
    ///
    /// Returns every object matched or created by this call, in identity order
    /// for matches followed by new objects in detection order.
    pub fn update_at(&mut self, detections: &[Point2<f32>], now: Instant) -> Vec<TrackUpdate> {
        let mut used = vec![false; detections.len()];
        let mut updates = Vec::with_capacity(detections.len());

        for obj in self.objects.iter_mut() {
            let predicted = obj.predict(now);
            let mut best: Option<(usize, f32)> = None;
            for (j, det) in detections.iter().enumerate() {
                if used[j] {
                    continue;
                }
                let dist = nalgebra::distance(&predicted, det);
                if dist <= self.config.max_distance && best.map_or(true, |(_, d)| dist < d) {
                    best = Some((j, dist));
                }
            }

            match best {
                Some((j, _)) => {
                    used[j] = true;
                    obj.update(detections[j], now, self.config.velocity_smoothing);
                    updates.push(TrackUpdate {
                        id: obj.id,
                        position: obj.position,
                        detection: j,
                    });
                }
                None => obj.lost_frames += 1,
            }
        }

        for (j, det) in detections.iter().enumerate() {
            if used[j] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.objects.push(TrackedObject::new(id, *det, now));
            log::debug!("new object {} at ({:.1}, {:.1})", id, det.x, det.y);
            updates.push(TrackUpdate {
                id,
                position: *det,
                detection: j,
            });
        }

        let max_lost = self.config.max_lost;
        self.pruned.clear();
        let pruned = &mut self.pruned;
        self.objects.retain(|obj| {
            if obj.lost_frames > max_lost {
                pruned.push(obj.id);
                false
            } else {
                true
            }
        });
        if !self.pruned.is_empty() {
            log::debug!("pruned objects {:?}", self.pruned);
        }

        updates
    }

    /// Identities dropped by the most recent update.
    pub fn pruned(&self) -> &[ObjectId] {
        &self.pruned
    }

    pub fn objects(&self) -> &[TrackedObject] {
        &self.objects
    }

    pub fn get(&self, id: ObjectId) -> Option<&TrackedObject> {
        self.objects
            .binary_search_by_key(&id, |o| o.id)
            .ok()
            .map(|i| &self.objects[i])
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    /// Record the latest classification on a tracked object.
    pub fn annotate(&mut self, id: ObjectId, state: MotionState, distance: f32) {
        if let Ok(i) = self.objects.binary_search_by_key(&id, |o| o.id) {
            let obj = &mut self.objects[i];
            obj.motion_state = state;
            obj.distance = distance;
        }
    }
}
