pub mod config;
pub mod frame_loop;
mod glyphs;
pub mod overlay;
pub mod source;
pub mod startup;

// Re-export vision types for convenience
pub use facecam_vision::{
    face, model, pipeline, video, Descriptor, Detection, Dimensions, Expression, Expressions,
    FaceAnalyzer, FaceDescription, FrameDetections, ModelKind, ModelLoader, Pipeline,
};
