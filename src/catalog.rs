use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

use crate::classifier::BtlClassifier;
use crate::errors::QuizError;
use crate::models::{ContributeRequest, Question};
use crate::log_store_operation;

/// Immutable snapshot of the question bank, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct QuestionCatalog {
    questions: Vec<Question>,
    index: HashMap<String, usize>,
    revision: u64,
}

impl QuestionCatalog {
    pub fn new(questions: Vec<Question>) -> Self {
        Self::with_revision(questions, 0)
    }

    pub(crate) fn with_revision(questions: Vec<Question>, revision: u64) -> Self {
        let index = questions
            .iter()
            .enumerate()
            .map(|(i, q)| (q.id.clone(), i))
            .collect();
        Self {
            questions,
            index,
            revision,
        }
    }

    pub fn lookup(&self, id: &str) -> Result<&Question, QuizError> {
        self.index
            .get(id)
            .map(|&i| &self.questions[i])
            .ok_or_else(|| QuizError::NotFound(id.to_string()))
    }

    pub fn all(&self) -> &[Question] {
        &self.questions
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Bumped every time the bank is appended to.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// On-disk layout of the question bank.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryDocument {
    #[serde(default)]
    questions: Vec<Question>,
}

/// Accepts both `{"questions": [...]}` and a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawLibrary {
    Document(LibraryDocument),
    Bare(Vec<Question>),
}

impl From<RawLibrary> for LibraryDocument {
    fn from(raw: RawLibrary) -> Self {
        match raw {
            RawLibrary::Document(doc) => doc,
            RawLibrary::Bare(questions) => LibraryDocument { questions },
        }
    }
}

/// Ids travel comma-joined in the flat form-field encoding, so they must be non-empty and comma-free.
fn check_ids(questions: &[Question]) -> Result<()> {
    if let Some(bad) = questions
        .iter()
        .find(|q| q.id.trim().is_empty() || q.id.contains(','))
    {
        anyhow::bail!("question id '{}' must be non-empty and must not contain ','", bad.id);
    }
    Ok(())
}

/// File-backed question bank. Readers take an `Arc` snapshot; appends swap in a new one.
#[derive(Clone)]
pub struct QuestionBank {
    path: PathBuf,
    snapshot: Arc<RwLock<Arc<QuestionCatalog>>>,
    write_lock: Arc<Mutex<()>>,
}

impl QuestionBank {
    /// Load the library at `path`. A missing file yields an empty bank.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = if fs::try_exists(&path).await.unwrap_or(false) {
            let raw = fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading question library {}", path.display()))?;
            let parsed: RawLibrary = serde_json::from_str(&raw)
                .with_context(|| format!("parsing question library {}", path.display()))?;
            LibraryDocument::from(parsed)
        } else {
            LibraryDocument::default()
        };

        check_ids(&document.questions)
            .with_context(|| format!("validating question library {}", path.display()))?;

        log_store_operation!(debug, "load", path = path.display(), count = document.questions.len());

        Ok(Self {
            path,
            snapshot: Arc::new(RwLock::new(Arc::new(QuestionCatalog::new(document.questions)))),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// In-memory bank for tests and tools; appends still write to `path`.
    pub fn from_questions(path: impl AsRef<Path>, questions: Vec<Question>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            snapshot: Arc::new(RwLock::new(Arc::new(QuestionCatalog::new(questions)))),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn snapshot(&self) -> Arc<QuestionCatalog> {
        self.snapshot.read().await.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate, classify and append a contributed multiple-choice question.
    pub async fn contribute(
        &self,
        request: ContributeRequest,
        classifier: &dyn BtlClassifier,
    ) -> Result<Question, QuizError> {
        let text = request.question.trim().to_string();
        if text.is_empty() {
            return Err(QuizError::Validation("Question cannot be empty.".to_string()));
        }

        let mut options = request.options.iter().map(|o| o.trim().to_string());
        let correct = options.next().unwrap_or_default();
        if correct.is_empty() {
            return Err(QuizError::Validation("Correct answer cannot be empty.".to_string()));
        }
        let mut all_options = vec![correct];
        all_options.extend(options.filter(|o| !o.is_empty()));

        let label = classifier
            .classify(&text)
            .await
            .map_err(|e| QuizError::Classifier(e.to_string()))?;

        let topic = request
            .topic
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let _guard = self.write_lock.lock().await;

        // Re-read so edits made by other tools are not clobbered.
        let mut document = self.read_document_lenient().await;
        let mut n = document.questions.len() + 1;
        let mut id = format!("q_{}", n);
        while document.questions.iter().any(|q| q.id == id) {
            n += 1;
            id = format!("q_{}", n);
        }

        let question = Question {
            id,
            text,
            options: all_options,
            correct_option_index: Some(0),
            correct_text: None,
            predicted_btl: Some(label),
            topic,
        };
        document.questions.push(question.clone());
        self.write_document(&document).await?;

        let mut snapshot = self.snapshot.write().await;
        let revision = snapshot.revision() + 1;
        *snapshot = Arc::new(QuestionCatalog::with_revision(document.questions, revision));

        log_store_operation!(info, "append", path = self.path.display(), "question appended");
        Ok(question)
    }

    /// Replace every question in the bank, used by maintenance tooling.
    pub async fn replace_all(&self, questions: Vec<Question>) -> Result<()> {
        check_ids(&questions)?;
        let _guard = self.write_lock.lock().await;
        let document = LibraryDocument { questions };
        self.write_document(&document).await?;

        let mut snapshot = self.snapshot.write().await;
        let revision = snapshot.revision() + 1;
        *snapshot = Arc::new(QuestionCatalog::with_revision(document.questions, revision));
        Ok(())
    }

    async fn read_document_lenient(&self) -> LibraryDocument {
        match fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str::<RawLibrary>(&raw)
                .map(LibraryDocument::from)
                .unwrap_or_default(),
            Err(_) => {
                let snapshot = self.snapshot.read().await;
                LibraryDocument {
                    questions: snapshot.all().to_vec(),
                }
            }
        }
    }

    async fn write_document(&self, document: &LibraryDocument) -> Result<()> {
        let body = serde_json::to_string_pretty(document)?;
        fs::write(&self.path, body)
            .await
            .with_context(|| format!("writing question library {}", self.path.display()))?;
        Ok(())
    }
}
