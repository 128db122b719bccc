// Challenge generation for human verification.
//
// The puzzle artifact itself (a rendered math captcha image plus its
// expected answer) comes from a collaborator behind `CaptchaBackend`; this
// module owns the answer-option policy and the per-attempt challenge state.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::ops::RangeInclusive;
use thiserror::Error;

/// How many answer buttons a challenge presents (one correct).
pub const OPTION_COUNT: usize = 4;
/// Decoy range for the image captcha.
pub const CAPTCHA_OPTION_RANGE: RangeInclusive<u32> = 0..=200;
/// Decoy range for the web flavor's confirmation step.
pub const WEB_OPTION_RANGE: RangeInclusive<u32> = 1..=100;
/// How often a user may regenerate a captcha before the affordance is
/// withdrawn.
pub const MAX_REGENERATIONS: u8 = 3;

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("captcha backend failed: {0}")]
    Backend(String),
}

/// A rendered puzzle and its expected answer.
#[derive(Debug, Clone)]
pub struct Captcha {
    pub image_png: Vec<u8>,
    pub answer: u32,
}

/// Collaborator producing captcha images. Failure is reported to the caller,
/// never raised past this boundary.
#[async_trait]
pub trait CaptchaBackend: Send + Sync {
    async fn generate(&self) -> Result<Captcha, ChallengeError>;
}

/// Draw `count - 1` distinct decoys from `range`, add the correct value and
/// shuffle. Decoys never collide with the correct value or each other.
pub fn shuffled_options(correct: u32, count: usize, range: RangeInclusive<u32>) -> Vec<u32> {
    let mut rng = rand::thread_rng();
    let mut decoys: HashSet<u32> = HashSet::new();
    while decoys.len() < count.saturating_sub(1) {
        let candidate = rng.gen_range(range.clone());
        if candidate != correct {
            decoys.insert(candidate);
        }
    }

    let mut options: Vec<u32> = decoys.into_iter().collect();
    options.push(correct);
    options.shuffle(&mut rng);
    options
}

/// Ephemeral state of one verification attempt, scoped to the in-memory
/// session and destroyed on any terminal outcome.
#[derive(Debug, Clone)]
pub struct ChallengeState {
    pub answer: u32,
    pub options: Vec<u32>,
    /// The challenge prompt (captcha photo) message.
    pub prompt_message_id: i64,
    pub regen_attempts: u8,
}

impl ChallengeState {
    pub fn issued(answer: u32, options: Vec<u32>, prompt_message_id: i64) -> Self {
        Self {
            answer,
            options,
            prompt_message_id,
            regen_attempts: 0,
        }
    }

    /// Whether the regenerate button is still offered.
    pub fn can_regenerate(&self) -> bool {
        self.regen_attempts < MAX_REGENERATIONS
    }

    /// A fresh puzzle for the same attempt, preserving the counter.
    pub fn regenerated(&self, answer: u32, options: Vec<u32>) -> Self {
        Self {
            answer,
            options,
            prompt_message_id: self.prompt_message_id,
            regen_attempts: self.regen_attempts + 1,
        }
    }
}
