//! Flat generation parameter set with checked coercion.
//!
//! Parameters arrive from several places (sequencer defaults, reference
//! JSON files, the command line) so values are kept as JSON and coerced
//! on read. A present value that cannot be coerced is an error, never a
//! silent default.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Parameter names
// ---------------------------------------------------------------------------

pub const PROMPT: &str = "prompt";
pub const NEGATIVE_PROMPT: &str = "negative_prompt";
/// First half of a split prompt (dual-field encoders, `text_g`).
pub const PROMPT_PART_A: &str = "prompt_part_a";
/// Second half of a split prompt (dual-field encoders, `text_l`).
pub const PROMPT_PART_B: &str = "prompt_part_b";
pub const WIDTH: &str = "width";
pub const HEIGHT: &str = "height";
pub const FPS: &str = "fps";
pub const SECONDS: &str = "seconds";
pub const STEPS: &str = "steps";
pub const CFG_SCALE: &str = "cfg_scale";
pub const SAMPLER: &str = "sampler";
pub const SCHEDULER: &str = "scheduler";
pub const SEED: &str = "seed";
/// Seed of the coarse / high-resolution sampler stage.
pub const SEED_HIGH: &str = "seed_high";
/// Seed of the fine / low-resolution sampler stage.
pub const SEED_LOW: &str = "seed_low";
pub const PREFIX: &str = "prefix";
/// Name of the uploaded source image, as known to the execution service.
pub const REFERENCE_IMAGE_NAME: &str = "reference_image_name";

// ---------------------------------------------------------------------------
// ParameterSet
// ---------------------------------------------------------------------------

/// Named generation parameters. Any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(Map<String, Value>);

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Insert or overwrite a value.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert only when `key` is absent (or `null`).
    pub fn set_default(&mut self, key: &str, value: impl Into<Value>) {
        if !self.contains(key) {
            self.insert(key, value);
        }
    }

    /// Copy every field of `other` that this set is missing.
    pub fn fill_missing_from(&mut self, other: &ParameterSet) {
        for (key, value) in &other.0 {
            if !self.contains(key) && !value.is_null() {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    /// Raw value; `null` counts as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read `key` as an integer.
    ///
    /// Accepts JSON integers, finite floats (truncated toward zero) and
    /// base-10 integer strings.
    pub fn integer(&self, key: &str) -> Result<Option<i64>, CoreError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let coerced = match value {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .map(f64::trunc)
                    .filter(|f| (I64_LOWER..I64_UPPER).contains(f))
                    .map(|f| f as i64)
            }),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        coerced
            .map(Some)
            .ok_or_else(|| coercion_error(key, "integer", value))
    }

    /// Read `key` as a sampler seed.
    ///
    /// Seeds span the full unsigned 64-bit range. Accepts non-negative
    /// JSON integers, integral floats below 2^64 and base-10 strings.
    pub fn seed(&self, key: &str) -> Result<Option<u64>, CoreError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let coerced = match value {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && (0.0..U64_UPPER).contains(f))
                    .map(|f| f as u64)
            }),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        coerced
            .map(Some)
            .ok_or_else(|| coercion_error(key, "seed", value))
    }

    /// Read `key` as a float. Accepts any JSON number or numeric string.
    pub fn float(&self, key: &str) -> Result<Option<f64>, CoreError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let coerced = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|f| f.is_finite());
        coerced
            .map(Some)
            .ok_or_else(|| coercion_error(key, "float", value))
    }

    /// Read `key` as text. Numbers are rendered in decimal form.
    pub fn text(&self, key: &str) -> Result<Option<String>, CoreError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(coercion_error(key, "string", other)),
        }
    }
}

impl From<Map<String, Value>> for ParameterSet {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// `i64::MIN` and `i64::MAX + 1` as floats; the upper bound is exclusive.
const I64_LOWER: f64 = -9_223_372_036_854_775_808.0;
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;
/// 2^64, exclusive.
const U64_UPPER: f64 = 18_446_744_073_709_551_616.0;

fn coercion_error(key: &str, expected: &'static str, value: &Value) -> CoreError {
    CoreError::ParameterCoercion {
        param: key.to_string(),
        expected,
        value: value.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
