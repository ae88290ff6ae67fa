//! Response interpreter
//!
//! The model is prompted to answer with `{"message": "...", "emotion":
//! [pleasure, arousal, dominance]}`, but replies arrive fenced in markdown,
//! with the text under `response`, or as plain prose. Parsing never fails;
//! anything unusable becomes an empty message with no emotion.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Pleasure, arousal, dominance; each nominally in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "[f32; 3]", from = "[f32; 3]")]
pub struct Emotion {
    /// Pleasure
    pub pleasure: f32,
    /// Arousal
    pub arousal: f32,
    /// Dominance
    pub dominance: f32,
}

impl Emotion {
    /// Create an emotion vector
    #[must_use]
    pub const fn new(pleasure: f32, arousal: f32, dominance: f32) -> Self {
        Self {
            pleasure,
            arousal,
            dominance,
        }
    }

    /// Check that every component is in `[0, 1]`
    #[must_use]
    pub fn in_range(&self) -> bool {
        [self.pleasure, self.arousal, self.dominance]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }
}

impl From<[f32; 3]> for Emotion {
    fn from([pleasure, arousal, dominance]: [f32; 3]) -> Self {
        Self::new(pleasure, arousal, dominance)
    }
}

impl From<Emotion> for [f32; 3] {
    fn from(e: Emotion) -> Self {
        [e.pleasure, e.arousal, e.dominance]
    }
}

/// Interpreted inference reply
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InferenceResponse {
    /// Text to speak; empty when nothing usable came back
    pub message: String,
    /// Emotion vector, absent unless exactly three numbers were given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Emotion>,
}

impl InferenceResponse {
    /// Serialize in the format the model is asked to produce
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default, alias = "response")]
    message: Option<String>,
    #[serde(default)]
    emotion: Option<serde_json::Value>,
}

/// Parse a raw model reply
///
/// Never fails: malformed input is logged and yields an empty response.
#[must_use]
pub fn parse_response(raw: &str) -> InferenceResponse {
    match try_parse(raw) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, raw = %raw, "unusable inference response");
            InferenceResponse::default()
        }
    }
}

fn try_parse(raw: &str) -> Result<InferenceResponse> {
    let body = strip_code_fence(raw);
    let parsed: RawResponse =
        serde_json::from_str(body).map_err(|e| Error::MalformedResponse(e.to_string()))?;

    let emotion = parsed.emotion.as_ref().and_then(emotion_from_value);
    if parsed.emotion.is_some() && emotion.is_none() {
        tracing::debug!(emotion = ?parsed.emotion, "ignoring emotion without three numbers");
    }
    if let Some(e) = emotion.filter(|e| !e.in_range()) {
        tracing::debug!(emotion = ?e, "emotion outside [0, 1]");
    }

    Ok(InferenceResponse {
        message: parsed.message.unwrap_or_default().trim().to_string(),
        emotion,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn emotion_from_value(value: &serde_json::Value) -> Option<Emotion> {
    let values = value.as_array()?;
    if values.len() != 3 {
        return None;
    }

    let mut components = [0.0f32; 3];
    for (slot, v) in components.iter_mut().zip(values) {
        *slot = v.as_f64()? as f32;
    }
    Some(components.into())
}

/// Remove a surrounding markdown code fence, with or without a language tag
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the language tag line
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
