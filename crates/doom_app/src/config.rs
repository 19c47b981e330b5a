//! Validated run configuration.

use std::time::Duration;

use tracing::info;

use doom_host::LoopConfig;
use doom_host::frame_loop::DEFAULT_FRAMES_PER_SECOND;

use crate::cli::TimingArgs;

/// Play time of one store or bus play when none is configured.
pub const DEFAULT_PLAY_TIME: Duration = Duration::from_millis(26_000);

/// How long a play may take to hand over its final checkpoint.
pub const CHECKPOINT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub frames_per_second: u32,
    /// `None` plays until stopped.
    pub play_time: Option<Duration>,
}

impl RunConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] for a zero play time.
    pub fn from_args(args: &TimingArgs, default_play_time: Option<Duration>) -> Result<Self, ConfigError> {
        let play_time = match args.play_time_ms {
            Some(0) => return Err(ConfigError::Zero("play time")),
            Some(ms) => Some(Duration::from_millis(ms)),
            None => default_play_time,
        };
        Ok(Self {
            frames_per_second: frames_per_second(args.fps),
            play_time,
        })
    }

    #[must_use]
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            frames_per_second: self.frames_per_second,
            max_frames: 0,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.loop_config().interval()
    }
}

/// A positive request is honoured up to the default rate; anything else
/// falls back to the default.
#[must_use]
pub fn frames_per_second(requested: Option<u32>) -> u32 {
    match requested {
        Some(fps) if fps > 0 => {
            let capped = fps.min(DEFAULT_FRAMES_PER_SECOND);
            info!(requested = fps, frames_per_second = capped, "frame rate configured");
            capped
        }
        _ => DEFAULT_FRAMES_PER_SECOND,
    }
}

/// # Errors
///
/// Returns [`ConfigError::Zero`] if no play is allowed.
pub fn max_plays(requested: u32) -> Result<u32, ConfigError> {
    if requested == 0 {
        return Err(ConfigError::Zero("max plays"));
    }
    Ok(requested)
}
