//! YuNet output decoding.
//!
//! YuNet is anchor-free: every cell of the stride-8, 16 and 32 feature grids
//! predicts one candidate face. The model emits twelve tensors, grouped by
//! kind and then by stride:
//!
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16, bbox_32, kps_8, kps_16, kps_32`
//!
//! with shapes `[1, H*W, 1]` for cls/obj, `[1, H*W, 4]` for bbox and
//! `[1, H*W, 10]` for the five landmark points. A cell at grid `(row, col)`
//! decodes as `cx = (col + dx) * stride`, `cy = (row + dy) * stride`,
//! `w = dw * stride`, `h = dh * stride`.

use anyhow::{Context, Result};
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// Decoded candidate in coordinates normalized to the square model input.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

/// All predictions of one stride level.
#[derive(Debug, Clone)]
pub struct StrideOutput {
    pub stride: usize,
    /// Combined `sqrt(cls * obj)` per cell, shape `[cells, 1]`.
    pub scores: Array2<f32>,
    pub boxes: Array2<f32>,
    pub keypoints: Array2<f32>,
}

impl StrideOutput {
    fn grid_side(&self, input_size: usize) -> usize {
        input_size / self.stride
    }
}

/// Number of grid cells for `stride` at a square `input_size`.
pub fn cell_count(input_size: usize, stride: usize) -> usize {
    let side = input_size / stride;
    side * side
}

fn tensor(
    outputs: &[(&[i64], &[f32])],
    index: usize,
    cells: usize,
    width: usize,
    what: &str,
) -> Result<Array2<f32>> {
    let (shape, data) = outputs
        .get(index)
        .with_context(|| format!("missing {what} output at index {index}"))?;
    if shape.len() != 3 || shape[0] != 1 || shape[2] != width as i64 {
        anyhow::bail!("unexpected {what} shape at index {index}: {shape:?}, expected [1, {cells}, {width}]");
    }
    if shape[1] != cells as i64 {
        anyhow::bail!("expected {cells} cells for {what} at index {index}, got {}", shape[1]);
    }
    Ok(Array2::from_shape_vec((cells, width), data.to_vec())?)
}

/// Group the twelve raw YuNet tensors by stride, combining class and
/// objectness into a single score. Both heads are already activated in the
/// exported model; they are clamped to `[0, 1]` before the geometric mean.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<StrideOutput>> {
    let levels = STRIDES.len();
    STRIDES
        .iter()
        .enumerate()
        .map(|(level, &stride)| {
            let cells = cell_count(input_size, stride);
            let cls = tensor(outputs, level, cells, 1, "cls")?;
            let obj = tensor(outputs, level + levels, cells, 1, "obj")?;
            let boxes = tensor(outputs, level + 2 * levels, cells, 4, "bbox")?;
            let keypoints = tensor(outputs, level + 3 * levels, cells, 10, "kps")?;
            Ok(StrideOutput {
                stride,
                scores: combine_scores(&cls, &obj),
                boxes,
                keypoints,
            })
        })
        .collect()
}

/// Turn grid predictions into normalized candidates scoring at least `score_threshold`.
pub fn decode(levels: &[StrideOutput], score_threshold: f32, input_size: usize) -> Result<Vec<RawDetection>> {
    let size = input_size as f32;
    let mut found = Vec::new();

    for level in levels {
        let side = level.grid_side(input_size);
        let cells = level.scores.nrows();
        if cells != side * side {
            anyhow::bail!(
                "stride {} expects a {side}x{side} grid, got {cells} cells",
                level.stride
            );
        }
        let stride = level.stride as f32;

        for idx in 0..cells {
            let score = level.scores[[idx, 0]];
            if score < score_threshold {
                continue;
            }
            let col = (idx % side) as f32;
            let row = (idx / side) as f32;

            let cx = (col + level.boxes[[idx, 0]]) * stride / size;
            let cy = (row + level.boxes[[idx, 1]]) * stride / size;
            let w = level.boxes[[idx, 2]] * stride / size;
            let h = level.boxes[[idx, 3]] * stride / size;

            let mut landmarks = [0.0f32; 10];
            for (k, pair) in landmarks.chunks_exact_mut(2).enumerate() {
                pair[0] = (col + level.keypoints[[idx, k * 2]]) * stride / size;
                pair[1] = (row + level.keypoints[[idx, k * 2 + 1]]) * stride / size;
            }

            found.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }

    Ok(found)
}

fn combine_scores(cls: &Array2<f32>, obj: &Array2<f32>) -> Array2<f32> {
    let mut combined = cls.mapv(|c| c.clamp(0.0, 1.0));
    combined.zip_mut_with(obj, |c, &o| *c = (*c * o.clamp(0.0, 1.0)).sqrt());
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_level(stride: usize, input_size: usize) -> StrideOutput {
        let cells = cell_count(input_size, stride);
        StrideOutput {
            stride,
            scores: Array2::zeros((cells, 1)),
            boxes: Array2::zeros((cells, 4)),
            keypoints: Array2::zeros((cells, 10)),
        }
    }

    #[test]
    fn test_combine_scores_clamps() {
        let cls = Array2::from_shape_vec((3, 1), vec![0.81, 1.5, -0.2]).unwrap();
        let obj = Array2::from_shape_vec((3, 1), vec![1.0, 0.25, 0.9]).unwrap();
        let combined = combine_scores(&cls, &obj);
        assert!((combined[[0, 0]] - 0.9).abs() < 1e-6);
        assert!((combined[[1, 0]] - 0.5).abs() < 1e-6);
        assert_eq!(combined[[2, 0]], 0.0);
    }

    #[test]
    fn test_decode_single_cell() {
        let input_size = 640;
        let mut levels: Vec<_> = STRIDES.iter().map(|&s| empty_level(s, input_size)).collect();

        // One face on the stride-32 grid at row 10, col 10.
        let idx = 10 * 20 + 10;
        let coarse = &mut levels[2];
        coarse.scores[[idx, 0]] = 0.9;
        coarse.boxes[[idx, 0]] = 0.5;
        coarse.boxes[[idx, 1]] = 0.3;
        coarse.boxes[[idx, 2]] = 4.0;
        coarse.boxes[[idx, 3]] = 4.0;

        let found = decode(&levels, 0.5, input_size).unwrap();
        assert_eq!(found.len(), 1);
        let det = &found[0];

        // cx = 10.5 * 32 / 640 = 0.525, cy = 10.3 * 32 / 640 = 0.515, w = h = 0.2
        assert!((det.bbox[0] - 0.425).abs() < 1e-5);
        assert!((det.bbox[1] - 0.415).abs() < 1e-5);
        assert!((det.bbox[2] - 0.2).abs() < 1e-5);
        assert!((det.bbox[3] - 0.2).abs() < 1e-5);
        assert!((det.score - 0.9).abs() < 1e-5);
        assert!((det.landmarks[0] - 0.5).abs() < 1e-5);
        assert!((det.landmarks[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_decode_rejects_wrong_grid() {
        let mut level = empty_level(8, 640);
        level.stride = 16;
        assert!(decode(&[level], 0.5, 640).is_err());
    }

    #[test]
    fn test_parse_combines_cls_and_obj() {
        let input_size = 64;
        let mut storage: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
        for (width, fill) in [(1usize, 0.64f32), (1, 1.0), (4, 0.0), (10, 0.0)] {
            for &stride in &STRIDES {
                let cells = cell_count(input_size, stride);
                storage.push((vec![1, cells as i64, width as i64], vec![fill; cells * width]));
            }
        }
        let refs: Vec<(&[i64], &[f32])> = storage
            .iter()
            .map(|(s, d)| (s.as_slice(), d.as_slice()))
            .collect();

        let levels = parse_outputs(&refs, input_size).unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].scores.nrows(), 64);
        assert!((levels[0].scores[[0, 0]] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_parse_reports_missing_output() {
        let refs: Vec<(&[i64], &[f32])> = Vec::new();
        let err = parse_outputs(&refs, 640).unwrap_err();
        assert!(err.to_string().contains("missing cls"));
    }
}
