use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};
use thiserror::Error;

use crate::pipeline::{DetectorSettings, FaceAnalyzer, Pipeline};

/// Pretrained models the analyzer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    /// YuNet: face boxes and five landmark points.
    FaceDetector,
    /// SFace: identity descriptors.
    FaceRecognition,
    /// FER+: expression confidences.
    FaceExpression,
}

impl ModelKind {
    /// Every model, in load order.
    pub const CANONICAL: [ModelKind; 3] = [
        ModelKind::FaceDetector,
        ModelKind::FaceRecognition,
        ModelKind::FaceExpression,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ModelKind::FaceDetector => "face_detection_yunet_2023mar.onnx",
            ModelKind::FaceRecognition => "face_recognition_sface_2021dec.onnx",
            ModelKind::FaceExpression => "emotion-ferplus-8.onnx",
        }
    }

    pub fn path_in(self, base: &Path) -> PathBuf {
        base.join(self.file_name())
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelKind::FaceDetector => "face detector",
            ModelKind::FaceRecognition => "face recognition",
            ModelKind::FaceExpression => "face expression",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{kind} model not found at {}", path.display())]
    Missing { kind: ModelKind, path: PathBuf },
    #[error("failed to initialize {kind} model from {}", path.display())]
    Session {
        kind: ModelKind,
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("{0} model was never loaded")]
    NotLoaded(ModelKind),
}

/// Loads models one at a time, then hands out the analyzer built from them.
///
/// `finish` consumes the loader, so an analyzer cannot exist before every
/// model it needs has been loaded.
pub trait ModelLoader {
    type Analyzer: FaceAnalyzer;

    fn load(&mut self, kind: ModelKind) -> Result<(), ModelError>;

    fn finish(self) -> Result<Self::Analyzer, ModelError>;
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

pub fn open_session(kind: ModelKind, base: &Path) -> Result<Session, ModelError> {
    let path = kind.path_in(base);
    if !path.is_file() {
        return Err(ModelError::Missing { kind, path });
    }
    session_builder()
        .and_then(|builder| Ok(builder.commit_from_file(&path)?))
        .map_err(|e| ModelError::Session {
            kind,
            path,
            source: e.into(),
        })
}

/// Builds ort sessions from `<base>/<file name>` for each model.
pub struct OrtModelLoader {
    base: PathBuf,
    settings: DetectorSettings,
    detector: Option<Session>,
    recognizer: Option<Session>,
    expression: Option<Session>,
}

impl OrtModelLoader {
    pub fn new(base: impl Into<PathBuf>, settings: DetectorSettings) -> Self {
        Self {
            base: base.into(),
            settings,
            detector: None,
            recognizer: None,
            expression: None,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl ModelLoader for OrtModelLoader {
    type Analyzer = Pipeline;

    fn load(&mut self, kind: ModelKind) -> Result<(), ModelError> {
        let session = open_session(kind, &self.base)?;
        let slot = match kind {
            ModelKind::FaceDetector => &mut self.detector,
            ModelKind::FaceRecognition => &mut self.recognizer,
            ModelKind::FaceExpression => &mut self.expression,
        };
        *slot = Some(session);
        Ok(())
    }

    fn finish(self) -> Result<Pipeline, ModelError> {
        Ok(Pipeline {
            detector: self
                .detector
                .ok_or(ModelError::NotLoaded(ModelKind::FaceDetector))?,
            encoder: self
                .recognizer
                .ok_or(ModelError::NotLoaded(ModelKind::FaceRecognition))?,
            expression: self
                .expression
                .ok_or(ModelError::NotLoaded(ModelKind::FaceExpression))?,
            settings: self.settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order_starts_with_detector() {
        assert_eq!(ModelKind::CANONICAL[0], ModelKind::FaceDetector);
        assert_eq!(ModelKind::CANONICAL.len(), 3);
    }

    #[test]
    fn test_missing_file_is_reported_with_path() {
        let base = std::env::temp_dir().join("facecam-no-such-model-dir");
        let mut loader = OrtModelLoader::new(&base, DetectorSettings::default());
        let err = loader.load(ModelKind::FaceExpression).unwrap_err();
        match &err {
            ModelError::Missing { kind, path } => {
                assert_eq!(*kind, ModelKind::FaceExpression);
                assert!(path.ends_with("emotion-ferplus-8.onnx"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("face expression"));
    }

    #[test]
    fn test_finish_without_loading_fails() {
        let loader = OrtModelLoader::new("/nonexistent", DetectorSettings::default());
        match loader.finish() {
            Err(ModelError::NotLoaded(ModelKind::FaceDetector)) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("finish succeeded without models"),
        }
    }
}
