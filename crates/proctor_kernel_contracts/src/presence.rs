#![forbid(unsafe_code)]

use crate::common::validate_finite;
use crate::{ContractViolation, MonotonicTimeNs, SchemaVersion, UnixTimeMs, Validate};

pub const PRESENCE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const MAX_EMBEDDING_DIMS: usize = 1024;
pub const MAX_FACES_PER_DETECTION: usize = 32;
pub const MAX_THUMBNAIL_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Result<Self, ContractViolation> {
        let p = Self { x, y };
        p.validate()?;
        Ok(p)
    }

    pub fn distance(&self, other: &Point2) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl Validate for Point2 {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_finite("point2.x", self.x)?;
        validate_finite("point2.y", self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Result<Self, ContractViolation> {
        let b = Self {
            x,
            y,
            width,
            height,
        };
        b.validate()?;
        Ok(b)
    }
}

impl Validate for FaceBox {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_finite("face_box.x", self.x)?;
        validate_finite("face_box.y", self.y)?;
        validate_finite("face_box.width", self.width)?;
        validate_finite("face_box.height", self.height)?;
        if self.width <= 0.0 {
            return Err(ContractViolation::InvalidValue {
                field: "face_box.width",
                reason: "must be > 0",
            });
        }
        if self.height <= 0.0 {
            return Err(ContractViolation::InvalidValue {
                field: "face_box.height",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// Face descriptor produced by the external detection model.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceEmbedding(Vec<f32>);

impl FaceEmbedding {
    pub fn new(values: Vec<f32>) -> Result<Self, ContractViolation> {
        let e = Self(values);
        e.validate()?;
        Ok(e)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dims(&self) -> usize {
        self.0.len()
    }

    /// Euclidean distance; embeddings of different dimensionality are not comparable.
    pub fn euclidean_distance(&self, other: &FaceEmbedding) -> Result<f32, ContractViolation> {
        if self.dims() != other.dims() {
            return Err(ContractViolation::InvalidValue {
                field: "face_embedding.dims",
                reason: "embeddings must have equal dimensionality",
            });
        }
        let sum: f32 = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        Ok(sum.sqrt())
    }
}

impl Validate for FaceEmbedding {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "face_embedding",
                reason: "must not be empty",
            });
        }
        if self.0.len() > MAX_EMBEDDING_DIMS {
            return Err(ContractViolation::InvalidValue {
                field: "face_embedding",
                reason: "must be <= 1024 dims",
            });
        }
        if self.0.iter().any(|v| !v.is_finite()) {
            return Err(ContractViolation::NotFinite {
                field: "face_embedding",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: FaceBox,
    pub left_eye: Vec<Point2>,
    pub right_eye: Vec<Point2>,
    pub descriptor: Option<FaceEmbedding>,
}

impl DetectedFace {
    pub fn v1(
        bbox: FaceBox,
        left_eye: Vec<Point2>,
        right_eye: Vec<Point2>,
        descriptor: Option<FaceEmbedding>,
    ) -> Result<Self, ContractViolation> {
        let f = Self {
            bbox,
            left_eye,
            right_eye,
            descriptor,
        };
        f.validate()?;
        Ok(f)
    }
}

impl Validate for DetectedFace {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.bbox.validate()?;
        if self.left_eye.len() > 16 || self.right_eye.len() > 16 {
            return Err(ContractViolation::InvalidValue {
                field: "detected_face.eye_landmarks",
                reason: "must be <= 16 points per eye",
            });
        }
        for p in self.left_eye.iter().chain(self.right_eye.iter()) {
            p.validate()?;
        }
        if let Some(d) = &self.descriptor {
            d.validate()?;
        }
        Ok(())
    }
}

/// Output shape of one detection pass over a camera frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FaceDetection {
    pub faces: Vec<DetectedFace>,
}

impl FaceDetection {
    pub fn v1(faces: Vec<DetectedFace>) -> Result<Self, ContractViolation> {
        let d = Self { faces };
        d.validate()?;
        Ok(d)
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }
}

impl Validate for FaceDetection {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.faces.len() > MAX_FACES_PER_DETECTION {
            return Err(ContractViolation::InvalidValue {
                field: "face_detection.faces",
                reason: "must be <= 32 faces",
            });
        }
        for f in &self.faces {
            f.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GazeStatus {
    AtCamera,
    Away,
    /// Not evaluated: zero or several faces, or no eye landmarks.
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceSample {
    pub schema_version: SchemaVersion,
    pub sampled_at: MonotonicTimeNs,
    pub face_count: u8,
    pub gaze: GazeStatus,
    pub descriptor: Option<FaceEmbedding>,
}

impl PresenceSample {
    pub fn v1(
        sampled_at: MonotonicTimeNs,
        face_count: u8,
        gaze: GazeStatus,
        descriptor: Option<FaceEmbedding>,
    ) -> Result<Self, ContractViolation> {
        let s = Self {
            schema_version: PRESENCE_CONTRACT_VERSION,
            sampled_at,
            face_count,
            gaze,
            descriptor,
        };
        s.validate()?;
        Ok(s)
    }

    pub fn looking_at_camera(&self) -> bool {
        self.gaze == GazeStatus::AtCamera
    }
}

impl Validate for PresenceSample {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != PRESENCE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "presence_sample.schema_version",
                reason: "must match PRESENCE_CONTRACT_VERSION",
            });
        }
        if self.face_count != 1 && self.gaze != GazeStatus::Unknown {
            return Err(ContractViolation::InvalidValue {
                field: "presence_sample.gaze",
                reason: "gaze is only evaluated for exactly one face",
            });
        }
        if self.face_count != 1 && self.descriptor.is_some() {
            return Err(ContractViolation::InvalidValue {
                field: "presence_sample.descriptor",
                reason: "descriptor is only carried for exactly one face",
            });
        }
        if let Some(d) = &self.descriptor {
            d.validate()?;
        }
        Ok(())
    }
}

/// Face captured during the identity-verification step preceding the exam.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceIdentity {
    pub schema_version: SchemaVersion,
    pub embedding: FaceEmbedding,
    pub thumbnail_jpeg: Vec<u8>,
    pub thumbnail_sha256: [u8; 32],
    pub captured_at: UnixTimeMs,
}

impl ReferenceIdentity {
    pub fn v1(
        embedding: FaceEmbedding,
        thumbnail_jpeg: Vec<u8>,
        thumbnail_sha256: [u8; 32],
        captured_at: UnixTimeMs,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: PRESENCE_CONTRACT_VERSION,
            embedding,
            thumbnail_jpeg,
            thumbnail_sha256,
            captured_at,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for ReferenceIdentity {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != PRESENCE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "reference_identity.schema_version",
                reason: "must match PRESENCE_CONTRACT_VERSION",
            });
        }
        self.embedding.validate()?;
        if self.thumbnail_jpeg.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "reference_identity.thumbnail_jpeg",
                reason: "must not be empty",
            });
        }
        if self.thumbnail_jpeg.len() > MAX_THUMBNAIL_BYTES {
            return Err(ContractViolation::InvalidValue {
                field: "reference_identity.thumbnail_jpeg",
                reason: "must be <= 512 KiB",
            });
        }
        Ok(())
    }
}
