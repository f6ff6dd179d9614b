use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use facecam_vision::Camera;
use image::RgbImage;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    Playing,
    Paused,
    Ended,
}

impl Playback {
    pub fn is_playing(self) -> bool {
        self == Playback::Playing
    }
}

/// Where frames come from.
pub trait FrameSource {
    fn playback(&self) -> Playback;

    /// Next frame. Only called while [`FrameSource::playback`] reports `Playing`.
    fn next_frame(&mut self) -> Result<RgbImage>;
}

impl FrameSource for Camera {
    fn playback(&self) -> Playback {
        Playback::Playing
    }

    fn next_frame(&mut self) -> Result<RgbImage> {
        self.frame()
    }
}

/// Still images from a directory, played once in file-name order.
pub struct ImageSequence {
    frames: Vec<PathBuf>,
    position: usize,
    ended: Arc<AtomicBool>,
}

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("reading {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        frames.sort();
        if frames.is_empty() {
            anyhow::bail!("no images found in {}", dir.display());
        }
        log::info!("{} frames queued from {}", frames.len(), dir.display());
        Ok(Self::from_paths(frames))
    }

    pub fn from_paths(frames: Vec<PathBuf>) -> Self {
        let ended = Arc::new(AtomicBool::new(frames.is_empty()));
        Self {
            frames,
            position: 0,
            ended,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Flag set once the last frame has been handed out.
    pub fn ended_flag(&self) -> Arc<AtomicBool> {
        self.ended.clone()
    }
}

impl FrameSource for ImageSequence {
    fn playback(&self) -> Playback {
        if self.ended.load(Ordering::Acquire) {
            Playback::Ended
        } else {
            Playback::Playing
        }
    }

    fn next_frame(&mut self) -> Result<RgbImage> {
        let path = self
            .frames
            .get(self.position)
            .context("image sequence already ended")?;
        self.position += 1;
        if self.position >= self.frames.len() {
            self.ended.store(true, Ordering::Release);
        }
        let img = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
        log::debug!("frame {}/{}: {}", self.position, self.frames.len(), path.display());
        Ok(img.to_rgb8())
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
