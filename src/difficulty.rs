use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::config::FilterConfig;
use crate::models::{PreferenceVector, Question};
use crate::{log_performance, log_service_warn};

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("vocabulary is empty")]
    EmptyVocabulary,

    #[error("training did not converge: {0}")]
    DidNotConverge(String),

    #[error("invalid preference vector")]
    InvalidPreferences,
}

/// Fits a reconstruction scorer to a fixed set of feature vectors.
pub trait ReconstructionScorer: Send + Sync {
    fn fit(&self, features: &[Vec<f64>]) -> Result<Box<dyn FittedScorer>, FilterError>;
}

/// A trained scorer; higher means the item reconstructs worse.
pub trait FittedScorer: Send + Sync {
    fn score(&self, item: &[f64]) -> f64;
}

fn token_pattern() -> &'static Regex {
    static TOKENS: OnceLock<Regex> = OnceLock::new();
    TOKENS.get_or_init(|| Regex::new(r"\b\w\w+\b").expect("static regex"))
}

fn tokenize(question: &Question) -> Vec<String> {
    let mut combined = question.topic.clone().unwrap_or_default();
    combined.push(' ');
    combined.push_str(&question.text);
    let lowered = combined.to_lowercase();
    token_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Feature rows for `questions`, one per question, all sharing the preference suffix.
pub fn build_features(
    questions: &[Question],
    preferences: &PreferenceVector,
    vocabulary_size: usize,
) -> Result<Vec<Vec<f64>>, FilterError> {
    let documents: Vec<Vec<String>> = questions.iter().map(tokenize).collect();

    let mut corpus_counts: HashMap<&str, usize> = HashMap::new();
    for doc in &documents {
        for token in doc {
            *corpus_counts.entry(token.as_str()).or_insert(0) += 1;
        }
    }
    if corpus_counts.is_empty() || vocabulary_size == 0 {
        return Err(FilterError::EmptyVocabulary);
    }

    let mut ranked: Vec<(&str, usize)> = corpus_counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(vocabulary_size);
    let vocabulary: HashMap<&str, usize> = ranked
        .iter()
        .enumerate()
        .map(|(i, (term, _))| (*term, i))
        .collect();

    let n = documents.len() as f64;
    let mut document_frequency = vec![0usize; vocabulary.len()];
    for doc in &documents {
        let mut seen = vec![false; vocabulary.len()];
        for token in doc {
            if let Some(&col) = vocabulary.get(token.as_str()) {
                if !seen[col] {
                    seen[col] = true;
                    document_frequency[col] += 1;
                }
            }
        }
    }
    let idf: Vec<f64> = document_frequency
        .iter()
        .map(|&df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0)
        .collect();

    let rows = documents
        .iter()
        .map(|doc| {
            let mut row = vec![0.0; vocabulary.len() + preferences.weights().len()];
            for token in doc {
                if let Some(&col) = vocabulary.get(token.as_str()) {
                    row[col] += 1.0;
                }
            }
            for (col, weight) in idf.iter().enumerate() {
                row[col] *= weight;
            }
            let norm = row[..vocabulary.len()].iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                for value in &mut row[..vocabulary.len()] {
                    *value /= norm;
                }
            }
            row[vocabulary.len()..].copy_from_slice(preferences.weights());
            row
        })
        .collect();

    Ok(rows)
}

/// Median in the numpy sense: mean of the two middle values for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Keep the ids whose error is at or below the median error.
pub fn select_at_or_below_median(ids: &[String], errors: &[f64]) -> Option<Vec<String>> {
    let cut = median(errors)?;
    Some(
        ids.iter()
            .zip(errors)
            .filter(|(_, error)| **error <= cut)
            .map(|(id, _)| id.clone())
            .collect(),
    )
}

/// Single-hidden-layer auto-encoder (tanh encoder, linear decoder) trained with SGD.
#[derive(Debug, Clone)]
pub struct AutoEncoder {
    pub latent_dim: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl AutoEncoder {
    pub fn new(latent_dim: usize, epochs: usize) -> Self {
        Self {
            latent_dim,
            epochs,
            learning_rate: 0.05,
            seed: 42,
        }
    }
}

struct TrainedAutoEncoder {
    input_dim: usize,
    hidden_dim: usize,
    // hidden_dim x input_dim, row-major
    encoder: Vec<f64>,
    encoder_bias: Vec<f64>,
    // input_dim x hidden_dim, row-major
    decoder: Vec<f64>,
    decoder_bias: Vec<f64>,
}

const GRADIENT_CLIP: f64 = 5.0;

impl TrainedAutoEncoder {
    fn forward(&self, x: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let hidden: Vec<f64> = (0..self.hidden_dim)
            .map(|h| {
                let row = &self.encoder[h * self.input_dim..(h + 1) * self.input_dim];
                let pre: f64 = row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + self.encoder_bias[h];
                pre.tanh()
            })
            .collect();
        let output: Vec<f64> = (0..self.input_dim)
            .map(|i| {
                let row = &self.decoder[i * self.hidden_dim..(i + 1) * self.hidden_dim];
                row.iter().zip(&hidden).map(|(w, z)| w * z).sum::<f64>() + self.decoder_bias[i]
            })
            .collect();
        (hidden, output)
    }

    fn reconstruction_error(&self, x: &[f64]) -> f64 {
        let (_, output) = self.forward(x);
        output.iter().zip(x).map(|(y, v)| (y - v).powi(2)).sum::<f64>() / self.input_dim as f64
    }

    fn train_step(&mut self, x: &[f64], learning_rate: f64) {
        let (hidden, output) = self.forward(x);
        let scale = 2.0 / self.input_dim as f64;
        let d_out: Vec<f64> = output
            .iter()
            .zip(x)
            .map(|(y, v)| (scale * (y - v)).clamp(-GRADIENT_CLIP, GRADIENT_CLIP))
            .collect();

        let mut d_hidden = vec![0.0; self.hidden_dim];
        for i in 0..self.input_dim {
            for h in 0..self.hidden_dim {
                d_hidden[h] += self.decoder[i * self.hidden_dim + h] * d_out[i];
            }
        }
        for h in 0..self.hidden_dim {
            d_hidden[h] = (d_hidden[h] * (1.0 - hidden[h] * hidden[h])).clamp(-GRADIENT_CLIP, GRADIENT_CLIP);
        }

        for i in 0..self.input_dim {
            for h in 0..self.hidden_dim {
                self.decoder[i * self.hidden_dim + h] -= learning_rate * d_out[i] * hidden[h];
            }
            self.decoder_bias[i] -= learning_rate * d_out[i];
        }
        for h in 0..self.hidden_dim {
            for j in 0..self.input_dim {
                self.encoder[h * self.input_dim + j] -= learning_rate * d_hidden[h] * x[j];
            }
            self.encoder_bias[h] -= learning_rate * d_hidden[h];
        }
    }
}

impl FittedScorer for TrainedAutoEncoder {
    fn score(&self, item: &[f64]) -> f64 {
        if item.len() != self.input_dim {
            return f64::INFINITY;
        }
        self.reconstruction_error(item)
    }
}

impl ReconstructionScorer for AutoEncoder {
    fn fit(&self, features: &[Vec<f64>]) -> Result<Box<dyn FittedScorer>, FilterError> {
        let input_dim = features.first().map(Vec::len).unwrap_or(0);
        if input_dim == 0 {
            return Err(FilterError::EmptyVocabulary);
        }
        if features.iter().any(|row| row.len() != input_dim) {
            return Err(FilterError::DidNotConverge("ragged feature rows".to_string()));
        }

        let hidden_dim = self.latent_dim.clamp(1, input_dim);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let limit = (6.0 / (input_dim + hidden_dim) as f64).sqrt();
        let mut init = |len: usize| -> Vec<f64> {
            (0..len).map(|_| rng.gen_range(-limit..limit)).collect()
        };

        let mut model = TrainedAutoEncoder {
            input_dim,
            hidden_dim,
            encoder: init(hidden_dim * input_dim),
            encoder_bias: vec![0.0; hidden_dim],
            decoder: init(input_dim * hidden_dim),
            decoder_bias: vec![0.0; input_dim],
        };

        let mut order: Vec<usize> = (0..features.len()).collect();
        for epoch in 0..self.epochs {
            order.shuffle(&mut rng);
            for &i in &order {
                model.train_step(&features[i], self.learning_rate);
            }

            let loss = features
                .iter()
                .map(|row| model.reconstruction_error(row))
                .sum::<f64>()
                / features.len() as f64;
            if !loss.is_finite() {
                return Err(FilterError::DidNotConverge(format!(
                    "loss became {} at epoch {}",
                    loss, epoch
                )));
            }
        }

        Ok(Box::new(model))
    }
}

/// Narrows a question pool to the half that best fits a preference vector.
///
/// Every question becomes a TF-IDF vector over the corpus vocabulary with the
/// user's six preference weights appended. An auto-encoder is fitted on exactly
/// those vectors and each question is scored by its reconstruction error; the
/// questions at or below the median error are kept.
#[derive(Clone)]
pub struct DifficultyFilter {
    vocabulary_size: usize,
    scorer: Arc<dyn ReconstructionScorer>,
}

impl DifficultyFilter {
    pub fn new(vocabulary_size: usize, scorer: Arc<dyn ReconstructionScorer>) -> Self {
        Self {
            vocabulary_size,
            scorer,
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(
            config.vocabulary_size,
            Arc::new(AutoEncoder::new(config.latent_dim, config.epochs)),
        )
    }

    /// Train, score and cut. Errors are returned as-is; see [`DifficultyFilter::filter`].
    pub fn try_filter(
        &self,
        questions: &[Question],
        preferences: &PreferenceVector,
    ) -> Result<Vec<String>, FilterError> {
        let ids: Vec<String> = questions.iter().map(|q| q.id.clone()).collect();
        if questions.len() < 2 {
            return Ok(ids);
        }
        if !preferences.is_valid() {
            return Err(FilterError::InvalidPreferences);
        }

        let started = Instant::now();
        let features = build_features(questions, preferences, self.vocabulary_size)?;
        let scorer = self.scorer.fit(&features)?;
        let errors: Vec<f64> = features.iter().map(|row| scorer.score(row)).collect();
        let kept = select_at_or_below_median(&ids, &errors).ok_or_else(|| {
            FilterError::DidNotConverge("non-finite reconstruction error".to_string())
        })?;

        log_performance!(
            "difficulty_filter",
            duration_ms = started.elapsed().as_millis() as u64,
            count = kept.len()
        );
        Ok(kept)
    }

    /// Fail-open variant: any training failure returns the whole pool.
    pub fn filter(&self, questions: &[Question], preferences: &PreferenceVector) -> Vec<String> {
        match self.try_filter(questions, preferences) {
            Ok(kept) if !kept.is_empty() => kept,
            Ok(_) => questions.iter().map(|q| q.id.clone()).collect(),
            Err(e) => {
                log_service_warn!(
                    "difficulty_filter",
                    "filter",
                    error = e,
                    "returning unfiltered question pool"
                );
                questions.iter().map(|q| q.id.clone()).collect()
            }
        }
    }
}
