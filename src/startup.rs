use facecam_vision::{ModelError, ModelKind, ModelLoader};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("loading models")]
    Model(#[from] ModelError),
    #[error("opening video source")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Load every canonical model, then acquire the video source.
///
/// Models come first: the analyzer only exists once all of them have loaded,
/// and a missing weight file fails without touching the camera.
pub fn initialize<L, S, F>(mut loader: L, open_source: F) -> Result<(L::Analyzer, S), StartupError>
where
    L: ModelLoader,
    F: FnOnce() -> anyhow::Result<S>,
{
    for kind in ModelKind::CANONICAL {
        log::info!("loading {} model", kind);
        loader.load(kind)?;
    }
    let analyzer = loader.finish()?;
    log::info!("all {} models ready", ModelKind::CANONICAL.len());

    let source = open_source().map_err(|e| StartupError::Source(e.into()))?;
    Ok((analyzer, source))
}
