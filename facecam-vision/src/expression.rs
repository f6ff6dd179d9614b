//! Facial expression classification with the FER+ model.
//!
//! FER+ takes a `[1, 1, 64, 64]` grayscale crop with values in `[0, 255]` and
//! returns eight unnormalized scores, one per [`Expression`].

use std::fmt;

use anyhow::{Context, Result};
use image::{imageops, GrayImage, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::face::Detection;

pub const EXPRESSION_INPUT: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expression {
    Neutral,
    Happiness,
    Surprise,
    Sadness,
    Anger,
    Disgust,
    Fear,
    Contempt,
}

impl Expression {
    /// Model output order.
    pub const ALL: [Expression; 8] = [
        Expression::Neutral,
        Expression::Happiness,
        Expression::Surprise,
        Expression::Sadness,
        Expression::Anger,
        Expression::Disgust,
        Expression::Fear,
        Expression::Contempt,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happiness => "happiness",
            Expression::Surprise => "surprise",
            Expression::Sadness => "sadness",
            Expression::Anger => "anger",
            Expression::Disgust => "disgust",
            Expression::Fear => "fear",
            Expression::Contempt => "contempt",
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Confidence per expression, summing to one.
#[derive(Debug, Clone, PartialEq)]
pub struct Expressions {
    scores: [f32; 8],
}

impl Default for Expressions {
    /// Entirely neutral.
    fn default() -> Self {
        let mut scores = [0.0; 8];
        scores[0] = 1.0;
        Self { scores }
    }
}

impl Expressions {
    /// Softmax over raw model scores in [`Expression::ALL`] order.
    pub fn from_logits(logits: &[f32]) -> Result<Self> {
        if logits.len() != Expression::ALL.len() {
            anyhow::bail!(
                "expected {} expression scores, got {}",
                Expression::ALL.len(),
                logits.len()
            );
        }
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut scores = [0.0f32; 8];
        for (dst, &l) in scores.iter_mut().zip(logits) {
            *dst = (l - max).exp();
        }
        let total: f32 = scores.iter().sum();
        scores.iter_mut().for_each(|s| *s /= total);
        Ok(Self { scores })
    }

    pub fn get(&self, expression: Expression) -> f32 {
        self.scores[expression as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Expression, f32)> + '_ {
        Expression::ALL.iter().copied().zip(self.scores.iter().copied())
    }

    pub fn dominant(&self) -> (Expression, f32) {
        self.iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((Expression::Neutral, 0.0))
    }

    /// Expressions with confidence strictly above `min_confidence`, most confident first.
    pub fn above(&self, min_confidence: f32) -> Vec<(Expression, f32)> {
        let mut kept: Vec<_> = self.iter().filter(|(_, c)| *c > min_confidence).collect();
        kept.sort_by(|a, b| b.1.total_cmp(&a.1));
        kept
    }
}

/// Grayscale crop of the detection box, clamped to the frame.
pub fn face_crop(frame: &RgbImage, detection: &Detection) -> Option<GrayImage> {
    let (fw, fh) = frame.dimensions();
    let [x, y, w, h] = detection.bbox;
    let x0 = x.max(0.0).floor() as u32;
    let y0 = y.max(0.0).floor() as u32;
    let x1 = ((x + w).ceil().max(0.0) as u32).min(fw);
    let y1 = ((y + h).ceil().max(0.0) as u32).min(fh);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    let crop = imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image();
    Some(imageops::grayscale(&crop))
}

fn gray_tensor(face: &GrayImage) -> Result<Array4<f32>> {
    let resized = imageops::resize(
        face,
        EXPRESSION_INPUT,
        EXPRESSION_INPUT,
        imageops::FilterType::Triangle,
    );
    let side = EXPRESSION_INPUT as usize;
    let data = resized.as_raw().iter().map(|&v| v as f32).collect();
    Ok(Array4::from_shape_vec((1, 1, side, side), data)?)
}

/// Classify the expression of the face inside `detection`.
pub fn classify_expression(
    session: &mut Session,
    frame: &RgbImage,
    detection: &Detection,
) -> Result<Expressions> {
    let crop = face_crop(frame, detection).context("face box lies outside the frame")?;
    let input = Value::from_array(gray_tensor(&crop)?)?;
    let outputs = session.run(ort::inputs![input])?;
    let (_shape, logits) = outputs[0].try_extract_tensor::<f32>()?;
    Expressions::from_logits(logits)
}
