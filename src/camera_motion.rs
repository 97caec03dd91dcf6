use nalgebra::Vector2;
use opencv::{
    calib3d,
    core::{self, DMatch, KeyPoint, Mat, Point2f, Vector},
    features2d::{BFMatcher, ORB_ScoreType, ORB},
    prelude::*,
};

use crate::config::CameraMotionConfig;

/// Keypoints and descriptors extracted from one frame.
struct FrameFeatures {
    keypoints: Vector<KeyPoint>,
    descriptors: Mat,
}

/// A descriptor match candidate: query index, train index, Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub query: usize,
    pub train: usize,
    pub distance: f32,
}

impl From<DMatch> for Candidate {
    fn from(m: DMatch) -> Self {
        Candidate {
            query: m.query_idx as usize,
            train: m.train_idx as usize,
            distance: m.distance,
        }
    }
}

/// Keep only matches whose best candidate beats the runner-up by `ratio`.
///
/// A match without a runner-up cannot be judged and is dropped.
pub fn unambiguous_matches(pairs: &[(Candidate, Option<Candidate>)], ratio: f32) -> Vec<Candidate> {
    pairs
        .iter()
        .filter_map(|(best, second)| match second {
            Some(second) if best.distance < ratio * second.distance => Some(*best),
            _ => None,
        })
        .collect()
}

/// Fit a RANSAC homography to the correspondences and return its translation.
///
/// Fewer than `min_matches` correspondences, or a failed fit, yields zero.
pub fn translation_from_correspondences(
    src: &[Point2f],
    dst: &[Point2f],
    min_matches: usize,
    ransac_threshold: f64,
) -> opencv::Result<Vector2<f32>> {
    if src.len() != dst.len() || src.len() < min_matches.max(4) {
        return Ok(Vector2::zeros());
    }
    let src_pts = Vector::<Point2f>::from_slice(src);
    let dst_pts = Vector::<Point2f>::from_slice(dst);
    let mut inliers = Mat::default();
    let h = calib3d::find_homography(&src_pts, &dst_pts, &mut inliers, calib3d::RANSAC, ransac_threshold)?;
    if h.rows() != 3 || h.cols() != 3 {
        return Ok(Vector2::zeros());
    }
    let tx = *h.at_2d::<f64>(0, 2)?;
    let ty = *h.at_2d::<f64>(1, 2)?;
    Ok(Vector2::new(tx as f32, ty as f32))
}

/// Global camera displacement between consecutive grayscale frames.
///
/// ORB keypoints, brute-force Hamming kNN with a ratio test, then the translation
/// column of a RANSAC homography. Any shortfall resolves to zero motion.
pub struct CameraMotionEstimator {
    config: CameraMotionConfig,
    orb: core::Ptr<ORB>,
    matcher: BFMatcher,
    prev: Option<FrameFeatures>,
}

impl CameraMotionEstimator {
    pub fn new(config: CameraMotionConfig) -> opencv::Result<Self> {
        let orb = ORB::create(
            config.max_features,
            1.2,
            8,
            31,
            0,
            2,
            ORB_ScoreType::HARRIS_SCORE,
            31,
            20,
        )?;
        let matcher = BFMatcher::new(core::NORM_HAMMING, false)?;
        Ok(CameraMotionEstimator {
            config,
            orb,
            matcher,
            prev: None,
        })
    }

    pub fn config(&self) -> &CameraMotionConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: CameraMotionConfig) -> opencv::Result<()> {
        self.orb.set_max_features(config.max_features)?;
        self.config = config;
        Ok(())
    }

    /// Forget the previous frame; the next call to [`apply`](Self::apply) yields zero.
    pub fn reset(&mut self) {
        self.prev = None;
    }

    /// Motion between the previously applied frame and `gray`.
    ///
    /// The first frame has nothing to compare against and yields zero.
    pub fn apply(&mut self, gray: &Mat) -> Vector2<f32> {
        let cur = match self.features(gray) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("feature extraction failed: {}", e);
                self.prev = None;
                return Vector2::zeros();
            }
        };
        let motion = match &self.prev {
            Some(prev) => self.motion_between(prev, &cur),
            None => Vector2::zeros(),
        };
        self.prev = Some(cur);
        motion
    }

    /// Motion between two arbitrary frames. Does not touch the stored frame.
    pub fn estimate(&mut self, prev_frame: &Mat, cur_frame: &Mat) -> Vector2<f32> {
        let features = self
            .features(prev_frame)
            .and_then(|p| self.features(cur_frame).map(|c| (p, c)));
        match features {
            Ok((prev, cur)) => self.motion_between(&prev, &cur),
            Err(e) => {
                log::warn!("feature extraction failed: {}", e);
                Vector2::zeros()
            }
        }
    }

    fn features(&mut self, gray: &Mat) -> opencv::Result<FrameFeatures> {
        let mut keypoints = Vector::<KeyPoint>::new();
        let mut descriptors = Mat::default();
        self.orb
            .detect_and_compute(gray, &Mat::default(), &mut keypoints, &mut descriptors, false)?;
        Ok(FrameFeatures {
            keypoints,
            descriptors,
        })
    }

    fn motion_between(&self, prev: &FrameFeatures, cur: &FrameFeatures) -> Vector2<f32> {
        match self.try_motion_between(prev, cur) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("camera motion estimate failed: {}", e);
                Vector2::zeros()
            }
        }
    }

    fn try_motion_between(&self, prev: &FrameFeatures, cur: &FrameFeatures) -> opencv::Result<Vector2<f32>> {
        let min = self.config.min_matches;
        if prev.keypoints.len() < min || cur.keypoints.len() < min || prev.descriptors.empty() || cur.descriptors.empty() {
            log::debug!(
                "too few keypoints for camera motion ({} / {})",
                prev.keypoints.len(),
                cur.keypoints.len()
            );
            return Ok(Vector2::zeros());
        }

        let good = self.good_matches(prev, cur)?;
        if good.len() < min {
            log::debug!("only {} unambiguous matches, assuming static camera", good.len());
            return Ok(Vector2::zeros());
        }

        let mut src = Vec::with_capacity(good.len());
        let mut dst = Vec::with_capacity(good.len());
        for m in &good {
            src.push(prev.keypoints.get(m.query)?.pt());
            dst.push(cur.keypoints.get(m.train)?.pt());
        }
        translation_from_correspondences(&src, &dst, min, self.config.ransac_threshold)
    }

    /// Descriptor matches from `prev` to `cur` that survive the ratio test.
    fn good_matches(&self, prev: &FrameFeatures, cur: &FrameFeatures) -> opencv::Result<Vec<Candidate>> {
        if prev.descriptors.empty() || cur.descriptors.empty() {
            return Ok(Vec::new());
        }
        let mut knn = Vector::<Vector<DMatch>>::new();
        self.matcher
            .knn_match(&prev.descriptors, &cur.descriptors, &mut knn, 2, &Mat::default(), false)?;

        let mut pairs = Vec::with_capacity(knn.len());
        for candidates in knn.iter() {
            if candidates.is_empty() {
                continue;
            }
            let best = Candidate::from(candidates.get(0)?);
            let second = if candidates.len() > 1 {
                Some(Candidate::from(candidates.get(1)?))
            } else {
                None
            };
            pairs.push((best, second));
        }

        Ok(unambiguous_matches(&pairs, self.config.ratio))
    }
}
