#![forbid(unsafe_code)]

use proctor_kernel_contracts::presence::{
    DetectedFace, FaceDetection, GazeStatus, Point2, PresenceSample, ReferenceIdentity,
};
use proctor_kernel_contracts::{ContractViolation, MonotonicTimeNs, UnixTimeMs, Validate};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresenceEvaluatorConfig {
    /// Eye-centre distance divided by face-box width. Below this the head is
    /// treated as turned away. Simplified heuristic, not a calibrated gaze model.
    pub min_eye_distance_ratio: f32,
    /// Embedding distance at or above which the face is a different person.
    pub identity_match_threshold: f32,
}

impl PresenceEvaluatorConfig {
    pub fn mvp_v1() -> Self {
        Self {
            min_eye_distance_ratio: 0.28,
            identity_match_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IdentityVerdict {
    NoReference,
    NoDescriptor,
    Incomparable,
    Match { distance: f32 },
    Mismatch { distance: f32 },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ReferenceCaptureError {
    #[error("no face visible in the verification frame")]
    NoFace,
    #[error("{count} faces visible in the verification frame")]
    MultipleFaces { count: usize },
    #[error("detected face carries no embedding")]
    NoDescriptor,
    #[error("reference identity invalid: {0}")]
    Contract(#[from] ContractViolation),
}

#[derive(Debug, Clone)]
pub struct PresenceEvaluator {
    config: PresenceEvaluatorConfig,
}

impl PresenceEvaluator {
    pub fn new(config: PresenceEvaluatorConfig) -> Result<Self, ContractViolation> {
        if !(config.min_eye_distance_ratio > 0.0 && config.min_eye_distance_ratio < 1.0) {
            return Err(ContractViolation::InvalidRange {
                field: "presence_evaluator_config.min_eye_distance_ratio",
                min: 0.0,
                max: 1.0,
                got: f64::from(config.min_eye_distance_ratio),
            });
        }
        if !(config.identity_match_threshold > 0.0 && config.identity_match_threshold <= 2.0) {
            return Err(ContractViolation::InvalidRange {
                field: "presence_evaluator_config.identity_match_threshold",
                min: 0.0,
                max: 2.0,
                got: f64::from(config.identity_match_threshold),
            });
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &PresenceEvaluatorConfig {
        &self.config
    }

    pub fn evaluate(
        &self,
        detection: &FaceDetection,
        sampled_at: MonotonicTimeNs,
    ) -> Result<PresenceSample, ContractViolation> {
        detection.validate()?;
        let face_count = u8::try_from(detection.face_count()).unwrap_or(u8::MAX);
        match detection.faces.as_slice() {
            [face] => PresenceSample::v1(
                sampled_at,
                face_count,
                self.gaze_status(face),
                face.descriptor.clone(),
            ),
            _ => PresenceSample::v1(sampled_at, face_count, GazeStatus::Unknown, None),
        }
    }

    pub fn gaze_status(&self, face: &DetectedFace) -> GazeStatus {
        let (Some(left), Some(right)) = (centroid(&face.left_eye), centroid(&face.right_eye))
        else {
            return GazeStatus::Unknown;
        };
        let ratio = left.distance(&right) / face.bbox.width;
        if !ratio.is_finite() {
            return GazeStatus::Unknown;
        }
        if ratio < self.config.min_eye_distance_ratio {
            GazeStatus::Away
        } else {
            GazeStatus::AtCamera
        }
    }

    pub fn compare_identity(
        &self,
        sample: &PresenceSample,
        reference: Option<&ReferenceIdentity>,
    ) -> IdentityVerdict {
        let Some(reference) = reference else {
            return IdentityVerdict::NoReference;
        };
        let Some(descriptor) = &sample.descriptor else {
            return IdentityVerdict::NoDescriptor;
        };
        match descriptor.euclidean_distance(&reference.embedding) {
            Ok(distance) => self.verdict_for_distance(distance),
            Err(_) => IdentityVerdict::Incomparable,
        }
    }

    /// Mismatch at or above the configured threshold.
    pub fn verdict_for_distance(&self, distance: f32) -> IdentityVerdict {
        if distance >= self.config.identity_match_threshold {
            IdentityVerdict::Mismatch { distance }
        } else {
            IdentityVerdict::Match { distance }
        }
    }

    /// Builds the reference identity from a verification frame. Exactly one
    /// face with an embedding must be visible.
    pub fn capture_reference(
        &self,
        detection: &FaceDetection,
        thumbnail_jpeg: Vec<u8>,
        captured_at: UnixTimeMs,
    ) -> Result<ReferenceIdentity, ReferenceCaptureError> {
        detection.validate()?;
        let face = match detection.faces.as_slice() {
            [] => return Err(ReferenceCaptureError::NoFace),
            [face] => face,
            faces => {
                return Err(ReferenceCaptureError::MultipleFaces { count: faces.len() })
            }
        };
        let embedding = face
            .descriptor
            .clone()
            .ok_or(ReferenceCaptureError::NoDescriptor)?;
        let digest: [u8; 32] = Sha256::digest(&thumbnail_jpeg).into();
        Ok(ReferenceIdentity::v1(
            embedding,
            thumbnail_jpeg,
            digest,
            captured_at,
        )?)
    }
}

fn centroid(points: &[Point2]) -> Option<Point2> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0f32, 0.0f32), |(x, y), p| (x + p.x, y + p.y));
    Some(Point2 {
        x: sx / n,
        y: sy / n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctor_kernel_contracts::presence::{FaceBox, FaceEmbedding};

    fn evaluator() -> PresenceEvaluator {
        PresenceEvaluator::new(PresenceEvaluatorConfig::mvp_v1()).unwrap()
    }

    fn eye(x: f32, y: f32) -> Vec<Point2> {
        vec![
            Point2::new(x - 2.0, y).unwrap(),
            Point2::new(x + 2.0, y).unwrap(),
        ]
    }

    fn face(left_x: f32, right_x: f32, descriptor: Option<Vec<f32>>) -> DetectedFace {
        DetectedFace::v1(
            FaceBox::new(100.0, 100.0, 100.0, 120.0).unwrap(),
            eye(left_x, 140.0),
            eye(right_x, 140.0),
            descriptor.map(|d| FaceEmbedding::new(d).unwrap()),
        )
        .unwrap()
    }

    fn reference(embedding: Vec<f32>) -> ReferenceIdentity {
        evaluator()
            .capture_reference(
                &FaceDetection::v1(vec![face(130.0, 170.0, Some(embedding))]).unwrap(),
                vec![0xFF, 0xD8, 0xFF],
                UnixTimeMs(1),
            )
            .unwrap()
    }

    #[test]
    fn at_presence_eval_01_frontal_face_is_at_camera() {
        let det = FaceDetection::v1(vec![face(130.0, 170.0, None)]).unwrap();
        let s = evaluator().evaluate(&det, MonotonicTimeNs(5)).unwrap();
        assert_eq!(s.face_count, 1);
        assert_eq!(s.gaze, GazeStatus::AtCamera);
    }

    #[test]
    fn at_presence_eval_02_narrow_eye_distance_is_looking_away() {
        let det = FaceDetection::v1(vec![face(145.0, 160.0, None)]).unwrap();
        let s = evaluator().evaluate(&det, MonotonicTimeNs(5)).unwrap();
        assert_eq!(s.gaze, GazeStatus::Away);
        assert!(!s.looking_at_camera());
    }

    #[test]
    fn at_presence_eval_03_multiple_faces_skip_gaze_and_descriptor() {
        let det = FaceDetection::v1(vec![
            face(130.0, 170.0, Some(vec![0.1, 0.2])),
            face(130.0, 170.0, Some(vec![0.1, 0.2])),
        ])
        .unwrap();
        let s = evaluator().evaluate(&det, MonotonicTimeNs(5)).unwrap();
        assert_eq!(s.face_count, 2);
        assert_eq!(s.gaze, GazeStatus::Unknown);
        assert!(s.descriptor.is_none());
    }

    #[test]
    fn at_presence_eval_04_identity_distance_at_threshold_is_mismatch() {
        let ev = evaluator();
        let reference = reference(vec![0.0, 0.0]);
        let det = FaceDetection::v1(vec![face(130.0, 170.0, Some(vec![0.0, 0.7]))]).unwrap();
        let s = ev.evaluate(&det, MonotonicTimeNs(1)).unwrap();
        match ev.compare_identity(&s, Some(&reference)) {
            IdentityVerdict::Mismatch { distance } => assert!((distance - 0.7).abs() < 1e-6),
            other => panic!("expected mismatch, got {other:?}"),
        }

        let det = FaceDetection::v1(vec![face(130.0, 170.0, Some(vec![0.0, 0.6]))]).unwrap();
        let s = ev.evaluate(&det, MonotonicTimeNs(2)).unwrap();
        assert!(matches!(
            ev.compare_identity(&s, Some(&reference)),
            IdentityVerdict::Mismatch { .. }
        ));

        let det = FaceDetection::v1(vec![face(130.0, 170.0, Some(vec![0.0, 0.3]))]).unwrap();
        let s = ev.evaluate(&det, MonotonicTimeNs(3)).unwrap();
        assert!(matches!(
            ev.compare_identity(&s, Some(&reference)),
            IdentityVerdict::Match { .. }
        ));
        assert_eq!(ev.compare_identity(&s, None), IdentityVerdict::NoReference);
    }

    #[test]
    fn at_presence_eval_07_distance_verdict_uses_inclusive_threshold() {
        let ev = evaluator();
        assert_eq!(
            ev.verdict_for_distance(0.6),
            IdentityVerdict::Mismatch { distance: 0.6 }
        );
        assert_eq!(
            ev.verdict_for_distance(0.59),
            IdentityVerdict::Match { distance: 0.59 }
        );
    }

    #[test]
    fn at_presence_eval_05_reference_capture_requires_single_face_with_embedding() {
        let ev = evaluator();
        assert_eq!(
            ev.capture_reference(&FaceDetection::default(), vec![1], UnixTimeMs(1)),
            Err(ReferenceCaptureError::NoFace)
        );
        let two = FaceDetection::v1(vec![face(130.0, 170.0, None), face(130.0, 170.0, None)])
            .unwrap();
        assert_eq!(
            ev.capture_reference(&two, vec![1], UnixTimeMs(1)),
            Err(ReferenceCaptureError::MultipleFaces { count: 2 })
        );
        let no_desc = FaceDetection::v1(vec![face(130.0, 170.0, None)]).unwrap();
        assert_eq!(
            ev.capture_reference(&no_desc, vec![1], UnixTimeMs(1)),
            Err(ReferenceCaptureError::NoDescriptor)
        );
        let r = reference(vec![0.5, 0.5]);
        let expected: [u8; 32] = Sha256::digest([0xFF, 0xD8, 0xFF]).into();
        assert_eq!(r.thumbnail_sha256, expected);
    }

    #[test]
    fn at_presence_eval_06_config_out_of_range_rejected() {
        let mut cfg = PresenceEvaluatorConfig::mvp_v1();
        cfg.min_eye_distance_ratio = 0.0;
        assert!(PresenceEvaluator::new(cfg).is_err());
    }
}
