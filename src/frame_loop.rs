//! The detection/render loop.
//!
//! Each iteration either idles (source paused or ended) or runs one full
//! pass: capture, detect, match overlay size, resize results, clear, draw
//! boxes, landmarks and expressions, present. Every iteration yields exactly
//! one delay until the next.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use facecam_vision::{resize_results, Dimensions, FaceAnalyzer};

use crate::overlay::Overlay;
use crate::source::{FrameSource, Playback};

/// Longest single sleep before the cancel flag is checked again.
const CANCEL_CHECK: Duration = Duration::from_millis(10);

/// How the next iteration is scheduled after a rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Start the next pass immediately; the source's blocking capture sets the pace.
    FrameSynced,
    /// Start passes a fixed interval apart, regardless of how fast the source delivers.
    FixedInterval(Duration),
}

/// What happens when an iteration fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the error and end the loop with it.
    Stop,
    /// Log and keep going, ending the loop once `max_consecutive` iterations in a row have failed.
    Skip { max_consecutive: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub cadence: Cadence,
    /// Delay before re-checking a paused or ended source.
    pub idle_poll: Duration,
    /// Displayed size; `None` displays frames at their native size.
    pub display: Option<Dimensions>,
    pub min_expression_confidence: f32,
    pub on_failure: FailurePolicy,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            cadence: Cadence::FrameSynced,
            idle_poll: Duration::from_millis(50),
            display: None,
            min_expression_confidence: 0.05,
            on_failure: FailurePolicy::Stop,
        }
    }
}

/// Outcome of one iteration, carrying the delay before the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Idle { playback: Playback, next_in: Duration },
    Rendered { faces: usize, next_in: Duration },
}

impl Tick {
    pub fn next_in(&self) -> Duration {
        match *self {
            Tick::Idle { next_in, .. } | Tick::Rendered { next_in, .. } => next_in,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub frames_rendered: u64,
    pub idle_polls: u64,
    pub failures: u64,
}

/// Shared stop flag for a running loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sleep for `duration`, waking early if cancelled. Returns whether it was cancelled.
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(CANCEL_CHECK));
        }
    }
}

pub struct FrameLoop<S, A, O> {
    source: S,
    analyzer: A,
    overlay: O,
    settings: LoopSettings,
    cancel: CancelToken,
    report: LoopReport,
}

impl<S, A, O> FrameLoop<S, A, O>
where
    S: FrameSource,
    A: FaceAnalyzer,
    O: Overlay,
{
    pub fn new(source: S, analyzer: A, overlay: O, settings: LoopSettings) -> Self {
        Self {
            source,
            analyzer,
            overlay,
            settings,
            cancel: CancelToken::new(),
            report: LoopReport::default(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn report(&self) -> LoopReport {
        self.report
    }

    pub fn overlay(&self) -> &O {
        &self.overlay
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run a single iteration.
    pub fn tick(&mut self) -> Result<Tick> {
        let playback = self.source.playback();
        if !playback.is_playing() {
            self.report.idle_polls += 1;
            return Ok(Tick::Idle {
                playback,
                next_in: self.settings.idle_poll,
            });
        }

        let started = Instant::now();
        let frame = self.source.next_frame().context("capturing frame")?;
        let results = self.analyzer.detect_all(&frame).context("detecting faces")?;

        let display = self.settings.display.unwrap_or(Dimensions::of(&frame));
        self.overlay.match_dimensions(display);
        let resized = resize_results(&results, display);

        self.overlay.clear();
        self.overlay.draw_detections(&resized.faces);
        self.overlay.draw_landmarks(&resized.faces);
        self.overlay
            .draw_expressions(&resized.faces, self.settings.min_expression_confidence);
        self.overlay.present(&frame).context("presenting overlay")?;

        self.report.frames_rendered += 1;
        let elapsed = started.elapsed();
        log::debug!(
            "frame {}: {} face(s) in {:?}",
            self.report.frames_rendered,
            resized.faces.len(),
            elapsed
        );

        let next_in = match self.settings.cadence {
            Cadence::FrameSynced => Duration::ZERO,
            Cadence::FixedInterval(interval) => interval.saturating_sub(elapsed),
        };
        Ok(Tick::Rendered {
            faces: resized.faces.len(),
            next_in,
        })
    }

    /// Iterate until cancelled or until the failure policy gives up.
    pub fn run(&mut self) -> Result<LoopReport> {
        log::info!("frame loop started ({:?})", self.settings.cadence);
        let mut consecutive = 0u32;

        while !self.cancel.is_cancelled() {
            let delay = match self.tick() {
                Ok(tick) => {
                    consecutive = 0;
                    tick.next_in()
                }
                Err(err) => {
                    self.report.failures += 1;
                    consecutive += 1;
                    match self.settings.on_failure {
                        FailurePolicy::Stop => {
                            log::error!("frame loop stopped: {:#}", err);
                            return Err(err);
                        }
                        FailurePolicy::Skip { max_consecutive } if consecutive >= max_consecutive => {
                            log::error!(
                                "frame loop stopped after {} consecutive failures: {:#}",
                                consecutive,
                                err
                            );
                            return Err(err.context(format!("{consecutive} consecutive failures")));
                        }
                        FailurePolicy::Skip { .. } => {
                            log::warn!("frame skipped ({} in a row): {:#}", consecutive, err);
                            self.settings.idle_poll
                        }
                    }
                }
            };
            if self.cancel.sleep(delay) {
                break;
            }
        }

        log::info!(
            "frame loop stopped: {} frames, {} idle polls, {} failures",
            self.report.frames_rendered,
            self.report.idle_polls,
            self.report.failures
        );
        Ok(self.report)
    }
}

impl<S, A, O> FrameLoop<S, A, O>
where
    S: FrameSource + Send + 'static,
    A: FaceAnalyzer + Send + 'static,
    O: Overlay + Send + 'static,
{
    /// Run the loop on a worker thread.
    pub fn spawn(mut self) -> Result<LoopHandle> {
        let cancel = self.cancel.clone();
        let worker = thread::Builder::new()
            .name("frame-loop".into())
            .spawn(move || self.run())
            .context("spawning frame loop thread")?;
        Ok(LoopHandle { cancel, worker })
    }
}

/// Control over a loop running on its own thread.
pub struct LoopHandle {
    cancel: CancelToken,
    worker: JoinHandle<Result<LoopReport>>,
}

impl LoopHandle {
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Cancel the loop and wait for it to wind down.
    pub fn stop(self) -> Result<LoopReport> {
        self.cancel.cancel();
        self.join()
    }

    /// Wait for the loop to end on its own.
    pub fn join(self) -> Result<LoopReport> {
        self.worker
            .join()
            .map_err(|_| anyhow::anyhow!("frame loop thread panicked"))?
    }
}
