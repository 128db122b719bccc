// Scam scoring - classifier port plus alerting policy.
//
// The text classifier is a black box. The only local logic is a
// post-processing rule that deboosts greeting-like messages, countering the
// model's false positives on salutations, and the alert threshold.

use async_trait::async_trait;
use thiserror::Error;

/// Probability above which a spam-labelled message opens a community vote.
pub const ALERT_THRESHOLD: f64 = 0.6;
const GREETING_DEBOOST: f64 = 0.4;

const GREETING_PHRASES: &[&str] = &[
    "hello",
    "hi",
    "good morning",
    "good afternoon",
    "good evening",
    "hey",
    "gm",
    "gn",
];

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier call failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScamLabel {
    Spam,
    NotSpam,
}

#[derive(Debug, Clone, Copy)]
pub struct ScamScore {
    pub label: ScamLabel,
    pub probability: f64,
}

/// Black-box scoring collaborator.
#[async_trait]
pub trait ScamClassifier: Send + Sync {
    async fn score(&self, text: &str) -> Result<ScamScore, ClassifierError>;
}

fn contains_greeting(text: &str) -> bool {
    let lowered = text.to_lowercase();
    GREETING_PHRASES
        .iter()
        .any(|greeting| lowered.contains(greeting))
}

pub struct ScamAnalyzer<C: ScamClassifier> {
    classifier: C,
}

impl<C: ScamClassifier> ScamAnalyzer<C> {
    pub fn new(classifier: C) -> Self {
        Self { classifier }
    }

    /// Score a message, applying the greeting deboost to spam verdicts.
    pub async fn analyze(&self, text: &str) -> Result<ScamScore, ClassifierError> {
        let mut score = self.classifier.score(text).await?;
        if score.label == ScamLabel::Spam && contains_greeting(text) {
            score.probability = (score.probability - GREETING_DEBOOST).max(0.0);
        }
        Ok(score)
    }
}

/// Whether a score is alarming enough to open a community vote.
pub fn should_alert(score: ScamScore) -> bool {
    score.label == ScamLabel::Spam && score.probability > ALERT_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClassifier(ScamScore);

    #[async_trait]
    impl ScamClassifier for FixedClassifier {
        async fn score(&self, _text: &str) -> Result<ScamScore, ClassifierError> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn greeting_deboost_moves_score_below_threshold() {
        let analyzer = ScamAnalyzer::new(FixedClassifier(ScamScore {
            label: ScamLabel::Spam,
            probability: 0.7,
        }));
        let score = analyzer.analyze("hello, claim your prize").await.unwrap();
        assert!((score.probability - 0.3).abs() < f64::EPSILON);
        assert!(!should_alert(score));
    }

    #[tokio::test]
    async fn deboost_clamps_at_zero() {
        let analyzer = ScamAnalyzer::new(FixedClassifier(ScamScore {
            label: ScamLabel::Spam,
            probability: 0.2,
        }));
        let score = analyzer.analyze("good morning all").await.unwrap();
        assert_eq!(score.probability, 0.0);
    }

    #[tokio::test]
    async fn non_greeting_spam_keeps_its_score() {
        let analyzer = ScamAnalyzer::new(FixedClassifier(ScamScore {
            label: ScamLabel::Spam,
            probability: 0.75,
        }));
        let score = analyzer.analyze("you won a million dollars").await.unwrap();
        assert!((score.probability - 0.75).abs() < f64::EPSILON);
        assert!(should_alert(score));
    }

    #[tokio::test]
    async fn not_spam_is_never_deboosted_or_alerted() {
        let analyzer = ScamAnalyzer::new(FixedClassifier(ScamScore {
            label: ScamLabel::NotSpam,
            probability: 0.9,
        }));
        let score = analyzer.analyze("hello there").await.unwrap();
        assert!((score.probability - 0.9).abs() < f64::EPSILON);
        assert!(!should_alert(score));
    }
}
