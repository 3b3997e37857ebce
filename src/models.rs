use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tally bucket used when a question carries no BTL label.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Number of Bloom levels (remembering .. creating).
pub const BLOOM_LEVELS: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "q_id")]
    pub id: String,
    #[serde(rename = "question")]
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_option_index: Option<usize>,
    #[serde(rename = "answer", default, skip_serializing_if = "Option::is_none")]
    pub correct_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_btl: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl Question {
    /// Tally key for this question's label; unlabelled questions land in `Unknown`.
    pub fn category_key(&self) -> String {
        self.predicted_btl
            .map(|label| label.to_string())
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
    }

    /// Judge a submitted answer.
    ///
    /// Multiple-choice questions accept only the exact decimal index. Free-text
    /// questions compare trimmed, lowercased text; an empty expected answer is
    /// never matched. Malformed submissions are simply incorrect.
    pub fn is_correct(&self, submitted: Option<&str>) -> bool {
        if let Some(index) = self.correct_option_index {
            return match submitted {
                Some(answer) => answer == index.to_string(),
                None => false,
            };
        }

        let expected = self
            .correct_text
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_lowercase();
        if expected.is_empty() {
            return false;
        }
        submitted.unwrap_or("").trim().to_lowercase() == expected
    }
}

/// Per-user weights over the six Bloom levels. Values are used as raw features.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreferenceVector(pub [f64; BLOOM_LEVELS]);

impl PreferenceVector {
    pub fn weights(&self) -> &[f64; BLOOM_LEVELS] {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0.iter().all(|w| w.is_finite() && *w >= 0.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub correct: u32,
    pub total: u32,
}

pub type CategoryTally = BTreeMap<String, CategoryCounts>;

/// Complete progress of one attempt. Nothing about an attempt lives outside this value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizState {
    pub cursor: usize,
    pub order: Vec<String>,
    pub correct_count: u32,
    pub total_count: u32,
    pub category_tally: CategoryTally,
    /// Epoch seconds.
    pub started_at: i64,
    /// Seconds.
    pub duration: u64,
}

impl QuizState {
    pub fn new(order: Vec<String>, started_at: i64, duration: u64) -> Self {
        Self {
            cursor: 0,
            order,
            correct_count: 0,
            total_count: 0,
            category_tally: CategoryTally::new(),
            started_at,
            duration,
        }
    }

    pub fn deadline(&self) -> i64 {
        self.started_at.saturating_add(self.duration as i64)
    }

    /// Seconds left at `now`, never negative.
    pub fn remaining_seconds(&self, now: i64) -> u64 {
        let elapsed = now.saturating_sub(self.started_at);
        (self.duration as i64).saturating_sub(elapsed).max(0) as u64
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.order.len()
    }

    pub fn current_question_id(&self) -> Option<&str> {
        self.order.get(self.cursor).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    TimedOut,
}

/// Question as shown to a quiz taker; the answer key is withheld.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub position: usize,
    pub total_questions: usize,
    pub remaining_seconds: u64,
    pub is_last: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizReport {
    pub correct_count: u32,
    pub total_count: u32,
    pub overall_percentage: f64,
    pub category_scores: CategoryTally,
    pub percentages: BTreeMap<String, f64>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributeRequest {
    pub question: String,
    /// First entry is the correct answer, the rest are distractors.
    pub options: Vec<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartQuizRequest {
    #[serde(default)]
    pub session_id: Option<uuid::Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPreferencesRequest {
    pub weights: PreferenceVector,
}
