//! Presentation of replies
//!
//! The dialogue controller hands every interpreted reply to a [`Presenter`].
//! How the emotion vector turns into a face, colours, and motion is a
//! swappable policy; [`PadPolicy`] is the default one.

use std::fmt;

use crate::turn::{Emotion, InferenceResponse};

/// Receives each interpreted reply
pub trait Presenter: Send + Sync {
    /// Show the reply; called before the message is spoken
    fn present(&self, response: &InferenceResponse);
}

/// Facial expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expression {
    /// High pleasure, high arousal
    Happy,
    /// Low pleasure, low arousal
    Sad,
    /// Low pleasure, high arousal, high dominance
    Angry,
    /// Low pleasure, high arousal, low dominance
    Scared,
    /// Very high arousal
    Surprised,
    /// High pleasure, low arousal
    Neutral,
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Scared => "scared",
            Self::Surprised => "surprised",
            Self::Neutral => "neutral",
        };
        f.write_str(label)
    }
}

/// Category of the short non-verbal sound played with a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Burst {
    /// High pleasure, high arousal
    Happiness,
    /// High pleasure, low arousal
    Neutral,
    /// Low pleasure, low arousal
    Sadness,
    /// Low pleasure, high arousal
    Fear,
}

/// Colour adjustments; hue comes from pleasure via the renderer's gradient
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorParams {
    /// Pleasure, used to sample the hue gradient
    pub hue_position: f32,
    /// Saturation from arousal
    pub saturation: f32,
    /// Outer shell alpha from dominance
    pub shell_alpha: f32,
    /// Face blush alpha from dominance
    pub blush_alpha: f32,
    /// Blend toward the complementary hue for the second waveform
    pub complement_mix: f32,
}

/// Body and waveform motion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionParams {
    /// Waveform amplitude while speaking
    pub amplitude: f32,
    /// Waveform noise speed
    pub noise_speed: f32,
    /// Waveform noise scale; high is jagged
    pub noise_scale: f32,
    /// Waveform rotation speed while speaking
    pub rotation_speed: f32,
    /// Hover and breathing speed
    pub idle_speed: f32,
    /// Polygon subdivision level of the body
    pub detail_level: u8,
}

/// Everything the renderer needs for one reply
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feedback {
    /// Face
    pub expression: Expression,
    /// Sound category
    pub burst: Burst,
    /// Colours
    pub color: ColorParams,
    /// Motion
    pub motion: MotionParams,
}

/// Default PAD mapping
///
/// Components are rounded to 0 or 1 before categorising, so the model's
/// fine-grained values only select a quadrant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PadPolicy {
    /// Saturation range
    pub saturation: (f32, f32),
    /// Shell alpha range
    pub shell_alpha: (f32, f32),
    /// Blush alpha range
    pub blush_alpha: (f32, f32),
    /// Amplitude range
    pub amplitude: (f32, f32),
    /// Noise speed range
    pub noise_speed: (f32, f32),
    /// Noise scale from unpleasant to pleasant
    pub noise_scale: (f32, f32),
    /// Rotation speed range
    pub rotation_speed: (f32, f32),
    /// Idle speed range
    pub idle_speed: (f32, f32),
    /// Polygon detail range
    pub detail_level: (u8, u8),
    /// Unrounded arousal at or above which the face shows surprise
    pub surprise_arousal: f32,
}

impl Default for PadPolicy {
    fn default() -> Self {
        Self {
            saturation: (0.4, 1.0),
            shell_alpha: (0.1, 0.9),
            blush_alpha: (0.3, 0.9),
            amplitude: (0.2, 1.5),
            noise_speed: (1.0, 5.0),
            noise_scale: (5.0, 1.0),
            rotation_speed: (0.25, 1.0),
            idle_speed: (0.1, 0.75),
            detail_level: (2, 6),
            surprise_arousal: 0.9,
        }
    }
}

impl PadPolicy {
    /// Derive presentation parameters from an emotion vector
    #[must_use]
    pub fn feedback(&self, emotion: Emotion) -> Feedback {
        let p = emotion.pleasure.clamp(0.0, 1.0).round();
        let a = emotion.arousal.clamp(0.0, 1.0).round();
        let d = emotion.dominance.clamp(0.0, 1.0).round();

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let detail_level = lerp(
            (
                f32::from(self.detail_level.0),
                f32::from(self.detail_level.1),
            ),
            p,
        )
        .round() as u8;

        let expression = if emotion.arousal >= self.surprise_arousal {
            Expression::Surprised
        } else {
            expression(p, a, d)
        };

        Feedback {
            expression,
            burst: burst(p, a),
            color: ColorParams {
                hue_position: p,
                saturation: lerp(self.saturation, a),
                shell_alpha: lerp(self.shell_alpha, d),
                blush_alpha: lerp(self.blush_alpha, d),
                complement_mix: d,
            },
            motion: MotionParams {
                amplitude: lerp(self.amplitude, a),
                noise_speed: lerp(self.noise_speed, a),
                noise_scale: lerp(self.noise_scale, p),
                rotation_speed: lerp(self.rotation_speed, d),
                idle_speed: lerp(self.idle_speed, a),
                detail_level,
            },
        }
    }
}

/// Pick a face for a rounded vector
fn expression(p: f32, a: f32, d: f32) -> Expression {
    match (p >= 0.5, a >= 0.5, d >= 0.5) {
        (true, false, _) => Expression::Neutral,
        (true, true, _) => Expression::Happy,
        (false, true, true) => Expression::Angry,
        (false, true, false) => Expression::Scared,
        (false, false, _) => Expression::Sad,
    }
}

fn burst(p: f32, a: f32) -> Burst {
    match (p >= 0.5, a >= 0.5) {
        (true, true) => Burst::Happiness,
        (true, false) => Burst::Neutral,
        (false, false) => Burst::Sadness,
        (false, true) => Burst::Fear,
    }
}

fn lerp((min, max): (f32, f32), t: f32) -> f32 {
    (max - min).mul_add(t.clamp(0.0, 1.0), min)
}

/// Presenter that logs the derived feedback
#[derive(Debug, Clone, Default)]
pub struct LogPresenter {
    policy: PadPolicy,
}

impl Presenter for LogPresenter {
    fn present(&self, response: &InferenceResponse) {
        let Some(emotion) = response.emotion else {
            tracing::info!(message = %response.message, "reply without emotion");
            return;
        };

        let feedback = self.policy.feedback(emotion);
        tracing::info!(
            message = %response.message,
            expression = %feedback.expression,
            burst = ?feedback.burst,
            "reply"
        );
        tracing::debug!(color = ?feedback.color, motion = ?feedback.motion, "feedback");
    }
}
