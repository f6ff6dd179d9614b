pub mod expression;
pub mod face;
pub mod model;
pub mod pipeline;
pub mod video;
pub mod yunet;

// Re-export commonly used types
pub use expression::{Expression, Expressions};
pub use face::{resize_results, Descriptor, Detection, Dimensions, FaceDescription, FrameDetections};
pub use model::{ModelError, ModelKind, ModelLoader, OrtModelLoader};
pub use pipeline::{DetectorSettings, FaceAnalyzer, Pipeline};
pub use video::Camera;
