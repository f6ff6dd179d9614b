use crate::expression::Expressions;
use crate::yunet;
use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array2, Array4};
use ort::{session::Session, value::Value};

/// Side of the square YuNet input.
pub const DETECTOR_INPUT: u32 = 640;
/// Side of the aligned SFace input.
pub const DESCRIPTOR_INPUT: u32 = 112;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(img: &RgbImage) -> Self {
        Self::new(img.width(), img.height())
    }
}

/// Detection result from YuNet, in source-frame pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // left eye, right eye, nose, left mouth, right mouth
}

impl Detection {
    pub fn landmark_points(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        self.landmarks.chunks_exact(2).map(|p| (p[0], p[1]))
    }

    fn scaled(&self, sx: f32, sy: f32) -> Self {
        let mut landmarks = self.landmarks;
        for pair in landmarks.chunks_exact_mut(2) {
            pair[0] *= sx;
            pair[1] *= sy;
        }
        Self {
            bbox: [
                self.bbox[0] * sx,
                self.bbox[1] * sy,
                self.bbox[2] * sx,
                self.bbox[3] * sy,
            ],
            score: self.score,
            landmarks,
        }
    }
}

/// Face descriptor (SFace output), L2-normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub vector: Array2<f32>,
}

impl Descriptor {
    /// Build a descriptor from raw values, normalizing to unit length.
    pub fn from_raw(values: Vec<f32>) -> Result<Self> {
        let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let len = values.len();
        let normalized = if norm > 0.0 {
            values.into_iter().map(|x| x / norm).collect()
        } else {
            values
        };
        Ok(Self {
            vector: Array2::from_shape_vec((1, len), normalized)?,
        })
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    /// Cosine similarity in `[-1, 1]`. Both sides are unit length, so this is the dot product.
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        let dot: f32 = self
            .vector
            .iter()
            .zip(other.vector.iter())
            .map(|(x, y)| x * y)
            .sum();
        dot.clamp(-1.0, 1.0)
    }
}

/// Everything the analyzer knows about one face in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDescription {
    pub detection: Detection,
    pub descriptor: Descriptor,
    pub expressions: Expressions,
}

/// Result set for one frame, with coordinates relative to `dimensions`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDetections {
    pub dimensions: Dimensions,
    pub faces: Vec<FaceDescription>,
}

impl FrameDetections {
    pub fn empty(dimensions: Dimensions) -> Self {
        Self {
            dimensions,
            faces: Vec::new(),
        }
    }
}

/// Rescale boxes and landmarks from the frame the detections were made on to `target`.
pub fn resize_results(results: &FrameDetections, target: Dimensions) -> FrameDetections {
    let from = results.dimensions;
    if from == target || from.width == 0 || from.height == 0 {
        return FrameDetections {
            dimensions: target,
            faces: results.faces.clone(),
        };
    }
    let sx = target.width as f32 / from.width as f32;
    let sy = target.height as f32 / from.height as f32;

    FrameDetections {
        dimensions: target,
        faces: results
            .faces
            .iter()
            .map(|face| FaceDescription {
                detection: face.detection.scaled(sx, sy),
                descriptor: face.descriptor.clone(),
                expressions: face.expressions.clone(),
            })
            .collect(),
    }
}

/// Aspect-preserving placement of a frame inside the square detector input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = target as f32 / width.max(height) as f32;
        let new_w = (width as f32 * scale) as u32;
        let new_h = (height as f32 * scale) as u32;
        Self {
            scale,
            offset_x: ((target - new_w) / 2) as f32,
            offset_y: ((target - new_h) / 2) as f32,
        }
    }

    /// Map a point in normalized model coordinates back to source pixels.
    fn to_source(&self, x: f32, y: f32, target: u32) -> (f32, f32) {
        let size = target as f32;
        (
            (x * size - self.offset_x) / self.scale,
            (y * size - self.offset_y) / self.scale,
        )
    }
}

/// Planar BGR tensor `[1, 3, H, W]` with values in `[0, 255]`.
pub(crate) fn bgr_tensor(img: &RgbImage) -> Result<Array4<f32>> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    let (b, rest) = data.split_at_mut(plane);
    let (g, r) = rest.split_at_mut(plane);

    for (i, px) in img.pixels().enumerate() {
        r[i] = px[0] as f32;
        g[i] = px[1] as f32;
        b[i] = px[2] as f32;
    }

    Ok(Array4::from_shape_vec((1, 3, h as usize, w as usize), data)?)
}

/// Detect faces in an image using the YuNet detector.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (orig_w, orig_h) = img.dimensions();
    if orig_w == 0 || orig_h == 0 {
        return Ok(Vec::new());
    }
    let letterbox = Letterbox::fit(orig_w, orig_h, DETECTOR_INPUT);

    let resized = img.resize_exact(
        (orig_w as f32 * letterbox.scale) as u32,
        (orig_h as f32 * letterbox.scale) as u32,
        image::imageops::FilterType::Triangle,
    );
    let mut canvas = DynamicImage::new_rgb8(DETECTOR_INPUT, DETECTOR_INPUT);
    image::imageops::overlay(
        &mut canvas,
        &resized,
        letterbox.offset_x as i64,
        letterbox.offset_y as i64,
    );

    let input = Value::from_array(bgr_tensor(&canvas.to_rgb8())?)?;
    let outputs = session.run(ort::inputs![input])?;

    let mut raw: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        raw.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let refs: Vec<(&[i64], &[f32])> = raw
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let levels = yunet::parse_outputs(&refs, DETECTOR_INPUT as usize)
        .context("parsing detector outputs")?;
    let candidates = yunet::decode(&levels, score_threshold, DETECTOR_INPUT as usize)?;

    let detections: Vec<Detection> = candidates
        .into_iter()
        .map(|c| {
            let (x, y) = letterbox.to_source(c.bbox[0], c.bbox[1], DETECTOR_INPUT);
            let size = DETECTOR_INPUT as f32;
            let w = c.bbox[2] * size / letterbox.scale;
            let h = c.bbox[3] * size / letterbox.scale;

            let mut landmarks = [0.0f32; 10];
            for (dst, src) in landmarks.chunks_exact_mut(2).zip(c.landmarks.chunks_exact(2)) {
                let (lx, ly) = letterbox.to_source(src[0], src[1], DETECTOR_INPUT);
                dst[0] = lx;
                dst[1] = ly;
            }

            Detection {
                bbox: [x, y, w, h],
                score: c.score,
                landmarks,
            }
        })
        .collect();

    log::debug!("detector kept {} candidates before nms", detections.len());

    if nms_threshold < 1.0 {
        Ok(nms(&detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Apply non-maximum suppression to remove overlapping detections
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Similarity transform mapping the detected eyes onto the ArcFace reference
/// eye positions of a `size`×`size` crop.
fn alignment(detection: &Detection, size: u32) -> Option<[f32; 6]> {
    const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
    const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);

    let (lx, ly) = (detection.landmarks[0], detection.landmarks[1]);
    let (rx, ry) = (detection.landmarks[2], detection.landmarks[3]);
    let dx = rx - lx;
    let dy = ry - ly;
    let eye_dist = (dx * dx + dy * dy).sqrt();
    if eye_dist <= f32::EPSILON {
        return None;
    }

    let unit = size as f32 / DESCRIPTOR_INPUT as f32;
    let ref_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
        + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
    .sqrt();
    let scale = unit * ref_dist / eye_dist;
    let angle = dy.atan2(dx);
    let (sin, cos) = angle.sin_cos();

    let a = scale * cos;
    let b = scale * sin;
    let c = -scale * sin;
    let d = scale * cos;

    let centre = ((lx + rx) / 2.0, (ly + ry) / 2.0);
    let target = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * unit,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * unit,
    );
    let tx = target.0 - (a * centre.0 + b * centre.1);
    let ty = target.1 - (c * centre.0 + d * centre.1);
    Some([a, b, c, d, tx, ty])
}

/// Align and crop a face using its eye landmarks, sampling bilinearly.
pub fn align_face(img: &RgbImage, detection: &Detection, size: u32) -> Result<RgbImage> {
    let [a, b, c, d, tx, ty] =
        alignment(detection, size).context("eye landmarks coincide, cannot align face")?;
    let det = a * d - b * c;
    let (img_w, img_h) = img.dimensions();
    let mut output = RgbImage::new(size, size);

    for (out_x, out_y, px) in output.enumerate_pixels_mut() {
        let ox = out_x as f32 - tx;
        let oy = out_y as f32 - ty;
        let in_x = (d * ox - b * oy) / det;
        let in_y = (-c * ox + a * oy) / det;

        if in_x < 0.0 || in_y < 0.0 || in_x >= img_w as f32 || in_y >= img_h as f32 {
            continue;
        }

        let x0 = in_x.floor() as u32;
        let y0 = in_y.floor() as u32;
        let x1 = (x0 + 1).min(img_w - 1);
        let y1 = (y0 + 1).min(img_h - 1);
        let fx = in_x - x0 as f32;
        let fy = in_y - y0 as f32;

        let p00 = img.get_pixel(x0, y0);
        let p10 = img.get_pixel(x1, y0);
        let p01 = img.get_pixel(x0, y1);
        let p11 = img.get_pixel(x1, y1);
        for ch in 0..3 {
            let v = p00[ch] as f32 * (1.0 - fx) * (1.0 - fy)
                + p10[ch] as f32 * fx * (1.0 - fy)
                + p01[ch] as f32 * (1.0 - fx) * fy
                + p11[ch] as f32 * fx * fy;
            px[ch] = v as u8;
        }
    }

    Ok(output)
}

/// Encode an aligned face crop into a descriptor using SFace.
pub fn describe_face(session: &mut Session, face: &RgbImage) -> Result<Descriptor> {
    let input = if face.dimensions() == (DESCRIPTOR_INPUT, DESCRIPTOR_INPUT) {
        bgr_tensor(face)?
    } else {
        let resized = image::imageops::resize(
            face,
            DESCRIPTOR_INPUT,
            DESCRIPTOR_INPUT,
            image::imageops::FilterType::Triangle,
        );
        bgr_tensor(&resized)?
    };

    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting shape [1, 128]
    let len = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    Descriptor::from_raw(data[..len].to_vec())
}
