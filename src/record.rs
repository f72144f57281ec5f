// Persisted session records. The only place that inspects trial arity.
// See DESIGN.md: Session format

use std::path::Path;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;
use crate::types::*;

/// One stimulus presentation and the participant's response.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub stimulus: String,
    pub true_label: Label,
    pub prediction: Label,
    /// Reaction duration in microseconds.
    pub duration_us: u64,
    pub gaze_samples: Vec<GazeSample>,
    /// Device-clock presentation window, written by newer collectors.
    pub window: Option<TrialWindow>,
}

impl Trial {
    pub fn first_sample(&self) -> Option<Timestamp> {
        self.gaze_samples.first().map(|s| s.timestamp)
    }

    pub fn last_sample(&self) -> Option<Timestamp> {
        self.gaze_samples.last().map(|s| s.timestamp)
    }
}

/// Trial tuple shapes written by different collector versions.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialRecord {
    WithCalibration {
        trial: Trial,
        calibration: Vec<GazeSample>,
    },
    WithoutCalibration {
        trial: Trial,
    },
}

impl TrialRecord {
    pub fn trial(&self) -> &Trial {
        match self {
            TrialRecord::WithCalibration { trial, .. } => trial,
            TrialRecord::WithoutCalibration { trial } => trial,
        }
    }

    pub fn calibration(&self) -> Option<&[GazeSample]> {
        match self {
            TrialRecord::WithCalibration { calibration, .. } => Some(calibration),
            TrialRecord::WithoutCalibration { .. } => None,
        }
    }

    /// Discriminate a trial tuple by arity and element shape.
    ///
    /// | arity | layout                                        |
    /// |-------|-----------------------------------------------|
    /// | 4     | `[[stimulus, label], prediction, duration, samples]` |
    /// | 5     | `[..., samples, [start, end]]` or `[..., samples, calibration]` |
    /// | 6     | `[..., samples, calibration, [start, end]]`   |
    pub fn from_value(index: usize, value: Value) -> Result<Self, PipelineError> {
        Self::parse(Some(index), value)
    }

    /// `index` is `None` when the record is read on its own, outside a session.
    fn parse(index: Option<usize>, value: Value) -> Result<Self, PipelineError> {
        let fields = match value {
            Value::Array(fields) => fields,
            other => {
                return Err(malformed(
                    index,
                    format!("expected a trial tuple, found {}", kind_of(&other)),
                ))
            }
        };

        let arity = fields.len();
        if !(4..=6).contains(&arity) {
            return Err(malformed(
                index,
                format!("unrecognized trial tuple arity {}", arity),
            ));
        }

        let mut fields = fields.into_iter();
        let mut next = |name: &str| -> Result<Value, PipelineError> {
            fields
                .next()
                .ok_or_else(|| malformed(index, format!("missing {}", name)))
        };

        let (stimulus, true_label): (String, Label) = field(index, "label pair", next("label pair")?)?;
        let prediction: Label = field(index, "prediction", next("prediction")?)?;
        let duration_us = duration_field(index, next("duration")?)?;
        let gaze_samples: Vec<GazeSample> = field(index, "gaze samples", next("gaze samples")?)?;

        let mut trial = Trial {
            stimulus,
            true_label,
            prediction,
            duration_us,
            gaze_samples,
            window: None,
        };

        match arity {
            4 => Ok(TrialRecord::WithoutCalibration { trial }),
            5 => {
                let extra = next("fifth field")?;
                if is_window(&extra) {
                    trial.window = Some(field(index, "timing window", extra)?);
                    Ok(TrialRecord::WithoutCalibration { trial })
                } else {
                    let calibration = field(index, "calibration samples", extra)?;
                    Ok(TrialRecord::WithCalibration { trial, calibration })
                }
            }
            _ => {
                let calibration = field(index, "calibration samples", next("calibration")?)?;
                let window = next("timing window")?;
                if !window.is_null() {
                    trial.window = Some(field(index, "timing window", window)?);
                }
                Ok(TrialRecord::WithCalibration { trial, calibration })
            }
        }
    }
}

fn malformed(index: Option<usize>, message: String) -> PipelineError {
    match index {
        Some(index) => PipelineError::trial_format(index, message),
        None => PipelineError::format(message),
    }
}

fn field<T: serde::de::DeserializeOwned>(
    index: Option<usize>,
    name: &str,
    value: Value,
) -> Result<T, PipelineError> {
    serde_json::from_value(value)
        .map_err(|e| malformed(index, format!("bad {}: {}", name, e)))
}

/// Durations from older collectors may be written as floats.
fn duration_field(index: Option<usize>, value: Value) -> Result<u64, PipelineError> {
    match value.as_u64() {
        Some(us) => Ok(us),
        None => match value.as_f64() {
            Some(us) if us.is_finite() && us >= 0.0 => Ok(us.round() as u64),
            _ => Err(malformed(index, format!("bad duration: {}", value))),
        },
    }
}

/// A timing window is a pair of numbers; calibration is a list of sample objects.
fn is_window(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.len() == 2 && items.iter().all(Value::is_number),
        _ => false,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl Serialize for TrialRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let trial = self.trial();
        let arity = 4 + usize::from(self.calibration().is_some()) + usize::from(trial.window.is_some());
        let mut seq = serializer.serialize_seq(Some(arity))?;
        seq.serialize_element(&(&trial.stimulus, trial.true_label))?;
        seq.serialize_element(&trial.prediction)?;
        seq.serialize_element(&trial.duration_us)?;
        seq.serialize_element(&trial.gaze_samples)?;
        if let Some(calibration) = self.calibration() {
            seq.serialize_element(calibration)?;
        }
        if let Some(window) = &trial.window {
            seq.serialize_element(window)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for TrialRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        TrialRecord::parse(None, value).map_err(de::Error::custom)
    }
}

/// A saved test: picture geometry, ordered trials and an optional test-wide calibration capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub geometry: PictureGeometry,
    pub eyetracking: Vec<TrialRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration: Option<Vec<GazeSample>>,
}

impl Session {
    /// Parse and validate the whole record before any trial is processed.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| PipelineError::format(format!("not valid JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_value(value: Value) -> Result<Self, PipelineError> {
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(PipelineError::format(format!(
                    "expected a session map, found {}",
                    kind_of(&other)
                )))
            }
        };

        let geometry = map
            .remove("geometry")
            .ok_or_else(|| PipelineError::format("missing key `geometry`"))?;
        let geometry: PictureGeometry = serde_json::from_value(geometry)
            .map_err(|e| PipelineError::format(format!("bad geometry: {}", e)))?;

        let trials = match map.remove("eyetracking") {
            Some(Value::Array(trials)) => trials,
            Some(other) => {
                return Err(PipelineError::format(format!(
                    "`eyetracking` must be a list, found {}",
                    kind_of(&other)
                )))
            }
            None => return Err(PipelineError::format("missing key `eyetracking`")),
        };
        let eyetracking = trials
            .into_iter()
            .enumerate()
            .map(|(index, value)| TrialRecord::from_value(index, value))
            .collect::<Result<Vec<_>, _>>()?;

        let calibration = match map.remove("calibration") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value(value)
                    .map_err(|e| PipelineError::format(format!("bad test calibration: {}", e)))?,
            ),
        };

        Ok(Session {
            geometry,
            eyetracking,
            calibration,
        })
    }

    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn trials(&self) -> impl Iterator<Item = &Trial> {
        self.eyetracking.iter().map(TrialRecord::trial)
    }
}

impl<'de> Deserialize<'de> for Session {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Session::from_value(value).map_err(de::Error::custom)
    }
}
