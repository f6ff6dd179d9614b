use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use facecam_vision::{Dimensions, FaceDescription};
use image::{imageops, Rgba, RgbaImage, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::glyphs;

const BOX_COLOR: Rgba<u8> = Rgba([0, 160, 255, 255]);
const LANDMARK_COLOR: Rgba<u8> = Rgba([255, 64, 64, 255]);
const LABEL_COLOR: Rgba<u8> = Rgba([255, 230, 0, 255]);
const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);
const LABEL_SCALE: u32 = 2;

/// Drawing surface laid over the displayed video.
pub trait Overlay {
    fn dimensions(&self) -> Dimensions;

    /// Resize the surface to the displayed video size.
    fn match_dimensions(&mut self, dims: Dimensions);

    /// Erase the whole surface.
    fn clear(&mut self);

    fn draw_detections(&mut self, faces: &[FaceDescription]);

    fn draw_landmarks(&mut self, faces: &[FaceDescription]);

    /// Label each face with the expressions whose confidence exceeds `min_confidence`.
    fn draw_expressions(&mut self, faces: &[FaceDescription], min_confidence: f32);

    /// Show the surface on top of `frame`.
    fn present(&mut self, frame: &RgbImage) -> Result<()>;
}

/// Where [`ImageOverlay`] writes composited frames.
#[derive(Debug, Clone)]
pub enum OverlayTarget {
    /// One file, replaced on every frame.
    Single(PathBuf),
    /// `frame_000001.png`, `frame_000002.png`, ... inside a directory.
    Numbered { dir: PathBuf, next: u64 },
}

/// Overlay rendered into an RGBA canvas and written as PNG.
pub struct ImageOverlay {
    canvas: RgbaImage,
    target: OverlayTarget,
}

impl ImageOverlay {
    pub fn new(target: OverlayTarget) -> Self {
        Self {
            canvas: RgbaImage::new(0, 0),
            target,
        }
    }

    pub fn single(path: impl Into<PathBuf>) -> Self {
        Self::new(OverlayTarget::Single(path.into()))
    }

    pub fn numbered(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self::new(OverlayTarget::Numbered { dir, next: 1 }))
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    fn composite(&self, frame: &RgbImage) -> RgbaImage {
        let (w, h) = self.canvas.dimensions();
        let rgba = image::DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
        let mut base = if rgba.dimensions() == (w, h) {
            rgba
        } else {
            imageops::resize(&rgba, w, h, imageops::FilterType::Triangle)
        };
        imageops::overlay(&mut base, &self.canvas, 0, 0);
        base
    }

    fn next_path(&mut self) -> PathBuf {
        match &mut self.target {
            OverlayTarget::Single(path) => path.clone(),
            OverlayTarget::Numbered { dir, next } => {
                let path = dir.join(format!("frame_{:06}.png", next));
                *next += 1;
                path
            }
        }
    }
}

fn write_png(img: &RgbaImage, path: &Path) -> Result<()> {
    // Write beside the target and rename so readers never see a partial file.
    let tmp = path.with_extension("png.tmp");
    img.save_with_format(&tmp, image::ImageFormat::Png)
        .with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

fn face_rect(face: &FaceDescription) -> Option<Rect> {
    let [x, y, w, h] = face.detection.bbox;
    let (w, h) = (w.round(), h.round());
    if w < 1.0 || h < 1.0 {
        return None;
    }
    Some(Rect::at(x.round() as i32, y.round() as i32).of_size(w as u32, h as u32))
}

impl Overlay for ImageOverlay {
    fn dimensions(&self) -> Dimensions {
        let (width, height) = self.canvas.dimensions();
        Dimensions { width, height }
    }

    fn match_dimensions(&mut self, dims: Dimensions) {
        if self.dimensions() != dims {
            log::debug!("overlay resized to {}x{}", dims.width, dims.height);
            self.canvas = RgbaImage::new(dims.width, dims.height);
        }
    }

    fn clear(&mut self) {
        self.canvas.pixels_mut().for_each(|p| *p = CLEAR);
    }

    fn draw_detections(&mut self, faces: &[FaceDescription]) {
        for face in faces {
            let Some(rect) = face_rect(face) else {
                continue;
            };
            draw_hollow_rect_mut(&mut self.canvas, rect, BOX_COLOR);
            if rect.width() > 2 && rect.height() > 2 {
                let inner = Rect::at(rect.left() + 1, rect.top() + 1)
                    .of_size(rect.width() - 2, rect.height() - 2);
                draw_hollow_rect_mut(&mut self.canvas, inner, BOX_COLOR);
            }
            let score = format!("{:.2}", face.detection.score);
            let y = rect.top() - glyphs::line_height(LABEL_SCALE);
            glyphs::draw_text(&mut self.canvas, rect.left(), y, &score, LABEL_SCALE, BOX_COLOR);
        }
    }

    fn draw_landmarks(&mut self, faces: &[FaceDescription]) {
        for face in faces {
            for (x, y) in face.detection.landmark_points() {
                draw_filled_circle_mut(
                    &mut self.canvas,
                    (x.round() as i32, y.round() as i32),
                    2,
                    LANDMARK_COLOR,
                );
            }
        }
    }

    fn draw_expressions(&mut self, faces: &[FaceDescription], min_confidence: f32) {
        for face in faces {
            let [x, y, _, h] = face.detection.bbox;
            let left = x.round() as i32;
            let mut top = (y + h).round() as i32 + LABEL_SCALE as i32 * 2;
            for (expression, confidence) in face.expressions.above(min_confidence) {
                let line = format!("{} ({:.2})", expression, confidence);
                glyphs::draw_text(&mut self.canvas, left, top, &line, LABEL_SCALE, LABEL_COLOR);
                top += glyphs::line_height(LABEL_SCALE);
            }
        }
    }

    fn present(&mut self, frame: &RgbImage) -> Result<()> {
        let composed = self.composite(frame);
        let path = self.next_path();
        write_png(&composed, &path)?;
        log::debug!("overlay written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facecam_vision::{Descriptor, Detection, Expressions};

    fn face(bbox: [f32; 4], landmarks: [f32; 10], logits: &[f32]) -> FaceDescription {
        FaceDescription {
            detection: Detection {
                bbox,
                score: 0.93,
                landmarks,
            },
            descriptor: Descriptor::from_raw(vec![1.0; 4]).unwrap(),
            expressions: Expressions::from_logits(logits).unwrap(),
        }
    }

    fn drawn(img: &RgbaImage) -> usize {
        img.pixels().filter(|p| p[3] > 0).count()
    }

    #[test]
    fn test_match_dimensions_and_clear() {
        let mut overlay = ImageOverlay::single("/unused.png");
        overlay.match_dimensions(Dimensions::new(64, 48));
        assert_eq!(overlay.dimensions(), Dimensions::new(64, 48));

        overlay.draw_detections(&[face([10.0, 20.0, 20.0, 20.0], [0.0; 10], &[0.0; 8])]);
        assert!(drawn(overlay.canvas()) > 0);
        overlay.clear();
        assert_eq!(drawn(overlay.canvas()), 0);
        assert_eq!(overlay.dimensions(), Dimensions::new(64, 48));
    }

    #[test]
    fn test_box_outline_is_drawn() {
        let mut overlay = ImageOverlay::single("/unused.png");
        overlay.match_dimensions(Dimensions::new(100, 100));
        overlay.draw_detections(&[face([30.0, 30.0, 40.0, 40.0], [0.0; 10], &[0.0; 8])]);
        assert_eq!(overlay.canvas().get_pixel(30, 50), &BOX_COLOR);
        assert_eq!(overlay.canvas().get_pixel(50, 50)[3], 0);
    }

    #[test]
    fn test_landmarks_are_dots() {
        let mut overlay = ImageOverlay::single("/unused.png");
        overlay.match_dimensions(Dimensions::new(100, 100));
        let lms = [20.0, 20.0, 40.0, 20.0, 30.0, 30.0, 22.0, 40.0, 38.0, 40.0];
        overlay.draw_landmarks(&[face([0.0, 0.0, 1.0, 1.0], lms, &[0.0; 8])]);
        assert_eq!(overlay.canvas().get_pixel(30, 30), &LANDMARK_COLOR);
        assert_eq!(overlay.canvas().get_pixel(60, 60)[3], 0);
    }

    #[test]
    fn test_expressions_respect_floor() {
        let mut confident = ImageOverlay::single("/unused.png");
        confident.match_dimensions(Dimensions::new(200, 200));
        // All mass on neutral: one label line.
        let sure = face([10.0, 10.0, 50.0, 50.0], [0.0; 10], &[20.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        confident.draw_expressions(&[sure.clone()], 0.05);
        let one_line = drawn(confident.canvas());
        assert!(one_line > 0);

        // A floor above every confidence draws nothing.
        let mut none = ImageOverlay::single("/unused.png");
        none.match_dimensions(Dimensions::new(200, 200));
        none.draw_expressions(&[sure], 1.0);
        assert_eq!(drawn(none.canvas()), 0);
    }

    #[test]
    fn test_present_numbered_writes_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut overlay = ImageOverlay::numbered(dir.path().join("out")).unwrap();
        overlay.match_dimensions(Dimensions::new(32, 16));
        let frame = RgbImage::from_pixel(64, 32, image::Rgb([9, 9, 9]));
        overlay.present(&frame).unwrap();
        overlay.present(&frame).unwrap();

        let first = image::open(dir.path().join("out/frame_000001.png")).unwrap();
        assert_eq!((first.width(), first.height()), (32, 16));
        assert!(dir.path().join("out/frame_000002.png").exists());
        assert!(!dir.path().join("out/frame_000001.png.tmp").exists());
    }

    #[test]
    fn test_present_single_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.png");
        let mut overlay = ImageOverlay::single(&path);
        overlay.match_dimensions(Dimensions::new(8, 8));
        let frame = RgbImage::new(8, 8);
        overlay.present(&frame).unwrap();
        overlay.present(&frame).unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
