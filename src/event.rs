//! Detection events: the time range and naming input for clip extraction.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WavError};

/// Start/stop offsets into a recording, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub start: f64,
    pub stop:  f64,
}

impl Span {
    pub fn new(start: f64, stop: f64) -> Result<Self> {
        let span = Self { start, stop };
        span.validate()?;
        Ok(span)
    }

    pub fn duration(&self) -> f64 {
        self.stop - self.start
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.start.is_finite() && self.stop.is_finite()) {
            return Err(WavError::InvalidEvent(format!("non-finite span {}..{}", self.start, self.stop)));
        }
        if self.start < 0.0 || self.stop < self.start {
            return Err(WavError::InvalidEvent(format!("span {}..{} is reversed or negative", self.start, self.stop)));
        }
        Ok(())
    }
}

/// One detection as reported by an analysis engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub span:         Span,
    /// Wall-clock time of the detection.
    pub timestamp:    DateTime<FixedOffset>,
    /// Short tag of the engine that produced the detection.
    pub engine:       String,
    pub species_code: String,
}

impl Event {
    /// `YYYYMMDD-HHMMSS±ZZZZ-<engine>-<code>.<ext>`
    pub fn clip_file_name(&self, ext: &str) -> String {
        format!(
            "{}-{}-{}.{}",
            self.timestamp.format("%Y%m%d-%H%M%S%z"),
            self.engine,
            self.species_code,
            ext
        )
    }
}
