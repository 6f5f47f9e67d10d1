//! Watermark markers: symbolic literals in a command template that stand
//! for a resumable cursor value.

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

pub const TIMESTAMP_BEGIN: &str = "$timestamp_begin$";
pub const TIMESTAMP_END: &str = "$timestamp_end$";
pub const DATE_BEGIN: &str = "$date_begin$";
pub const DATE_END: &str = "$date_end$";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bound {
    /// Lower bound of the scanned range; resumes from the checkpoint.
    Begin,
    /// Upper bound; always the current value.
    End,
}

/// Markers of one family share a checkpoint slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Family {
    Timestamp,
    Date,
    Custom(String),
}

/// Value bound to a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WatermarkValue {
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Literal(String),
}

impl fmt::Display for WatermarkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkValue::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
            WatermarkValue::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            WatermarkValue::Literal(s) => f.write_str(s),
        }
    }
}

/// Source of "now" for fresh marker values.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        // Second precision, matching what is persisted
        let now = Local::now().naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    pub literal: String,
    pub bound: Bound,
    pub family: Family,
    /// Fresh value for custom markers
    pub default_value: Option<String>,
}

impl Watermark {
    fn builtin(literal: &str, bound: Bound, family: Family) -> Self {
        Self {
            literal: literal.to_string(),
            bound,
            family,
            default_value: None,
        }
    }

    pub fn custom(literal: impl Into<String>, bound: Bound, default_value: impl Into<String>) -> Self {
        let literal = literal.into();
        Self {
            family: Family::Custom(literal.clone()),
            literal,
            bound,
            default_value: Some(default_value.into()),
        }
    }

    /// The literal as written in a template.
    pub fn quoted(&self) -> String {
        format!("'{}'", self.literal)
    }

    pub fn fresh_value(&self, clock: &dyn Clock) -> WatermarkValue {
        match &self.family {
            Family::Timestamp => WatermarkValue::Timestamp(clock.now()),
            Family::Date => WatermarkValue::Date(clock.now().date()),
            Family::Custom(_) => {
                WatermarkValue::Literal(self.default_value.clone().unwrap_or_default())
            }
        }
    }

    /// Parses a persisted checkpoint back into a typed value.
    pub fn parse_value(&self, key: &str, stored: &str) -> Result<WatermarkValue> {
        let invalid = |reason: String| Error::MissingCheckpointPrerequisite {
            key: key.to_string(),
            value: stored.to_string(),
            reason,
        };
        match &self.family {
            Family::Timestamp => NaiveDateTime::parse_from_str(stored, TIMESTAMP_FORMAT)
                .map(WatermarkValue::Timestamp)
                .map_err(|e| invalid(format!("not a timestamp: {}", e))),
            Family::Date => NaiveDate::parse_from_str(stored, DATE_FORMAT)
                .map(WatermarkValue::Date)
                .map_err(|e| invalid(format!("not a date: {}", e))),
            Family::Custom(_) if stored.is_empty() => Err(invalid("empty value".to_string())),
            Family::Custom(_) => Ok(WatermarkValue::Literal(stored.to_string())),
        }
    }
}

/// Markers recognised in templates, in declaration order.
#[derive(Debug, Clone)]
pub struct MarkerCatalog {
    markers: Vec<Watermark>,
}

impl Default for MarkerCatalog {
    fn default() -> Self {
        Self {
            markers: vec![
                Watermark::builtin(TIMESTAMP_BEGIN, Bound::Begin, Family::Timestamp),
                Watermark::builtin(TIMESTAMP_END, Bound::End, Family::Timestamp),
                Watermark::builtin(DATE_BEGIN, Bound::Begin, Family::Date),
                Watermark::builtin(DATE_END, Bound::End, Family::Date),
            ],
        }
    }
}

impl MarkerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marker(mut self, marker: Watermark) -> Self {
        self.markers.push(marker);
        self
    }

    pub fn markers(&self) -> &[Watermark] {
        &self.markers
    }

    /// Begin marker that owns the checkpoint slot for `family`.
    pub fn begin_of(&self, family: &Family) -> Option<&Watermark> {
        self.markers
            .iter()
            .find(|m| m.bound == Bound::Begin && &m.family == family)
    }

    /// Rejects templates that mention a marker more than once.
    pub fn validate(&self, template: &str) -> Result<()> {
        for marker in &self.markers {
            let count = template.matches(marker.literal.as_str()).count();
            if count > 1 {
                return Err(Error::AmbiguousMarker {
                    marker: marker.literal.clone(),
                    count,
                });
            }
        }
        Ok(())
    }
}
