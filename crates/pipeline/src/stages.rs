//! Parameter sets for the two pipeline stages.

use rand::Rng;
use t2i2v_core::params::{self, ParameterSet};

use crate::frames::FrameSize;

/// Image prompt length limit.
pub const IMAGE_PROMPT_MAX_CHARS: usize = 600;
/// Video prompt length limit.
pub const VIDEO_PROMPT_MAX_CHARS: usize = 700;

// Text-to-image defaults.
const IMAGE_STEPS: i64 = 28;
const IMAGE_CFG: f64 = 5.0;
const IMAGE_SAMPLER: &str = "euler";
const IMAGE_SCHEDULER: &str = "karras";

// Image-to-video defaults, applied only when the reference omits them.
const VIDEO_STEPS: i64 = 8;
const VIDEO_CFG: f64 = 3.0;
const VIDEO_SAMPLER: &str = "euler";
const VIDEO_SCHEDULER: &str = "simple";

/// Exclusive upper bound for generated seeds.
const SEED_LIMIT: i64 = 1 << 31;

/// Trim `text` and cap it at `max_chars` characters, backing off to the
/// last comma inside the cut when there is one.
pub fn compact_prompt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    match cut.rfind(',') {
        Some(pos) if pos > 0 => cut[..pos].to_string(),
        _ => cut,
    }
}

/// A fresh seed in `[0, 2^31)`.
pub fn random_seed() -> i64 {
    rand::rng().random_range(0..SEED_LIMIT)
}

/// Inputs for the text-to-image stage of one iteration.
#[derive(Debug, Clone)]
pub struct ImageStageInput<'a> {
    pub size: FrameSize,
    pub part_a: &'a str,
    pub part_b: &'a str,
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub prefix: String,
    pub seed: i64,
}

/// Text-to-image parameters.
pub fn image_params(input: &ImageStageInput<'_>) -> ParameterSet {
    ParameterSet::new()
        .with(params::WIDTH, input.size.width)
        .with(params::HEIGHT, input.size.height)
        .with(params::STEPS, IMAGE_STEPS)
        .with(params::CFG_SCALE, IMAGE_CFG)
        .with(params::SAMPLER, IMAGE_SAMPLER)
        .with(params::SCHEDULER, IMAGE_SCHEDULER)
        .with(params::SEED, input.seed)
        .with(
            params::PROMPT,
            compact_prompt(input.prompt, IMAGE_PROMPT_MAX_CHARS),
        )
        .with(params::PROMPT_PART_A, input.part_a)
        .with(params::PROMPT_PART_B, input.part_b)
        .with(params::NEGATIVE_PROMPT, input.negative_prompt)
        .with(params::PREFIX, input.prefix.as_str())
}

/// Inputs for the image-to-video stage of one iteration.
#[derive(Debug, Clone)]
pub struct VideoStageInput<'a> {
    /// Reference combination for this iteration, if any.
    pub reference: Option<&'a ParameterSet>,
    pub size: FrameSize,
    /// Frame rate drawn for this iteration; overrides the reference.
    pub random_fps: Option<u32>,
    /// Frame rate used when neither the draw nor the reference sets one.
    pub fixed_fps: u32,
    pub seconds: f64,
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub prefix: String,
    pub reference_image_name: &'a str,
}

/// Image-to-video parameters.
///
/// The reference combination wins for every field it sets, except the
/// per-iteration fields (prompt, negative prompt, prefix, image
/// reference, and a randomly drawn fps).
pub fn video_params(input: &VideoStageInput<'_>) -> ParameterSet {
    let mut p = input.reference.cloned().unwrap_or_default();

    p.set_default(params::WIDTH, input.size.width);
    p.set_default(params::HEIGHT, input.size.height);
    match input.random_fps {
        Some(fps) => p.insert(params::FPS, fps),
        None => p.set_default(params::FPS, input.fixed_fps),
    }
    p.set_default(params::SECONDS, input.seconds);

    p.insert(
        params::PROMPT,
        compact_prompt(input.prompt, VIDEO_PROMPT_MAX_CHARS),
    );
    p.insert(params::NEGATIVE_PROMPT, input.negative_prompt);
    p.insert(params::PREFIX, input.prefix.as_str());
    p.insert(params::REFERENCE_IMAGE_NAME, input.reference_image_name);

    p.set_default(params::CFG_SCALE, VIDEO_CFG);
    p.set_default(params::STEPS, VIDEO_STEPS);
    p.set_default(params::SAMPLER, VIDEO_SAMPLER);
    p.set_default(params::SCHEDULER, VIDEO_SCHEDULER);
    p
}
