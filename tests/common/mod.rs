//! Stand-ins for the camera, the face analyzer, the model loader and the overlay.
//! Every call is appended to a shared event log so tests can check ordering.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use facecam::model::ModelError;
use facecam::overlay::Overlay;
use facecam::source::{FrameSource, Playback};
use facecam::{
    Descriptor, Detection, Dimensions, Expressions, FaceAnalyzer, FaceDescription,
    FrameDetections, ModelKind, ModelLoader,
};
use image::RgbImage;

#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.all().iter().filter(|e| *e == event).count()
    }
}

pub fn face_at(bbox: [f32; 4]) -> FaceDescription {
    let [x, y, w, h] = bbox;
    FaceDescription {
        detection: Detection {
            bbox,
            score: 0.9,
            landmarks: [
                x + w * 0.3,
                y + h * 0.4,
                x + w * 0.7,
                y + h * 0.4,
                x + w * 0.5,
                y + h * 0.6,
                x + w * 0.35,
                y + h * 0.8,
                x + w * 0.65,
                y + h * 0.8,
            ],
        },
        descriptor: Descriptor::from_raw(vec![0.5; 128]).unwrap(),
        expressions: Expressions::from_logits(&[0.0, 3.0, 1.0, -5.0, -5.0, -5.0, -5.0, -5.0])
            .unwrap(),
    }
}

pub struct FakeSource {
    pub events: Events,
    pub playback: Arc<Mutex<Playback>>,
    pub size: Dimensions,
}

impl FakeSource {
    pub fn new(events: &Events, playback: Playback, size: Dimensions) -> Self {
        Self {
            events: events.clone(),
            playback: Arc::new(Mutex::new(playback)),
            size,
        }
    }
}

impl FrameSource for FakeSource {
    fn playback(&self) -> Playback {
        *self.playback.lock().unwrap()
    }

    fn next_frame(&mut self) -> Result<RgbImage> {
        self.events.push("frame");
        Ok(RgbImage::new(self.size.width, self.size.height))
    }
}

/// Returns `faces` for every frame; calls listed in `fail_calls` (1-based) fail,
/// as does every call when `fail_always` is set.
pub struct FakeAnalyzer {
    pub events: Events,
    pub faces: Vec<FaceDescription>,
    pub calls: usize,
    pub fail_calls: Vec<usize>,
    pub fail_always: bool,
}

impl FakeAnalyzer {
    pub fn new(events: &Events, faces: Vec<FaceDescription>) -> Self {
        Self {
            events: events.clone(),
            faces,
            calls: 0,
            fail_calls: Vec::new(),
            fail_always: false,
        }
    }
}

impl FaceAnalyzer for FakeAnalyzer {
    fn detect_all(&mut self, frame: &RgbImage) -> Result<FrameDetections> {
        self.calls += 1;
        self.events.push("detect");
        if self.fail_always || self.fail_calls.contains(&self.calls) {
            anyhow::bail!("inference failed on call {}", self.calls);
        }
        Ok(FrameDetections {
            dimensions: Dimensions::of(frame),
            faces: self.faces.clone(),
        })
    }
}

#[derive(Default)]
pub struct Drawn {
    pub dims: Option<Dimensions>,
    pub detections: Vec<FaceDescription>,
    pub min_confidence: Option<f32>,
    pub presented: usize,
}

pub struct RecordingOverlay {
    pub events: Events,
    pub drawn: Arc<Mutex<Drawn>>,
}

impl RecordingOverlay {
    pub fn new(events: &Events) -> Self {
        Self {
            events: events.clone(),
            drawn: Arc::new(Mutex::new(Drawn::default())),
        }
    }
}

impl Overlay for RecordingOverlay {
    fn dimensions(&self) -> Dimensions {
        self.drawn
            .lock()
            .unwrap()
            .dims
            .unwrap_or(Dimensions::new(0, 0))
    }

    fn match_dimensions(&mut self, dims: Dimensions) {
        self.events
            .push(format!("match {}x{}", dims.width, dims.height));
        self.drawn.lock().unwrap().dims = Some(dims);
    }

    fn clear(&mut self) {
        self.events.push("clear");
    }

    fn draw_detections(&mut self, faces: &[FaceDescription]) {
        self.events.push(format!("detections {}", faces.len()));
        self.drawn.lock().unwrap().detections = faces.to_vec();
    }

    fn draw_landmarks(&mut self, faces: &[FaceDescription]) {
        self.events.push(format!("landmarks {}", faces.len()));
    }

    fn draw_expressions(&mut self, faces: &[FaceDescription], min_confidence: f32) {
        self.events
            .push(format!("expressions {} {}", faces.len(), min_confidence));
        self.drawn.lock().unwrap().min_confidence = Some(min_confidence);
    }

    fn present(&mut self, _frame: &RgbImage) -> Result<()> {
        self.events.push("present");
        self.drawn.lock().unwrap().presented += 1;
        Ok(())
    }
}

pub struct FakeLoader {
    pub events: Events,
    pub fail_on: Option<ModelKind>,
    pub faces: Vec<FaceDescription>,
}

impl ModelLoader for FakeLoader {
    type Analyzer = FakeAnalyzer;

    fn load(&mut self, kind: ModelKind) -> Result<(), ModelError> {
        self.events.push(format!("load {}", kind));
        if self.fail_on == Some(kind) {
            return Err(ModelError::Missing {
                kind,
                path: PathBuf::from("/models").join(kind.file_name()),
            });
        }
        Ok(())
    }

    fn finish(self) -> Result<FakeAnalyzer, ModelError> {
        self.events.push("finish");
        Ok(FakeAnalyzer::new(&self.events, self.faces))
    }
}
