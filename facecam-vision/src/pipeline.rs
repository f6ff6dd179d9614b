use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage};
use ort::session::Session;

use crate::expression;
use crate::face::{self, Dimensions, FaceDescription, FrameDetections, DESCRIPTOR_INPUT};

/// Thresholds applied by the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// Finds every face in a frame together with its landmarks, descriptor and
/// expression confidences. Coordinates are in frame pixels.
pub trait FaceAnalyzer {
    fn detect_all(&mut self, frame: &RgbImage) -> Result<FrameDetections>;
}

/// Full pipeline: detect faces → align → describe, classify expression
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub expression: Session,
    pub settings: DetectorSettings,
}

impl Pipeline {
    fn describe(&mut self, frame: &RgbImage, detection: face::Detection) -> Result<FaceDescription> {
        let aligned =
            face::align_face(frame, &detection, DESCRIPTOR_INPUT).context("aligning face")?;
        let descriptor =
            face::describe_face(&mut self.encoder, &aligned).context("encoding face")?;
        let expressions = expression::classify_expression(&mut self.expression, frame, &detection)
            .context("classifying expression")?;
        Ok(FaceDescription {
            detection,
            descriptor,
            expressions,
        })
    }
}

impl FaceAnalyzer for Pipeline {
    fn detect_all(&mut self, frame: &RgbImage) -> Result<FrameDetections> {
        let dimensions = Dimensions::of(frame);
        let img = DynamicImage::ImageRgb8(frame.clone());
        let detections = face::detect_faces(
            &mut self.detector,
            &img,
            self.settings.score_threshold,
            self.settings.nms_threshold,
        )
        .context("detecting faces")?;

        let mut faces = Vec::with_capacity(detections.len());
        for detection in detections {
            faces.push(self.describe(frame, detection)?);
        }
        Ok(FrameDetections { dimensions, faces })
    }
}
