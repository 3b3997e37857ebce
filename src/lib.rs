pub mod adaptive;
pub mod api;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod difficulty;
pub mod errors;
pub mod logging;
pub mod models;
pub mod quiz_engine;
pub mod quiz_service;
pub mod results;
pub mod state_codec;
pub mod state_store;

pub use adaptive::AdaptivePool;
pub use catalog::{QuestionBank, QuestionCatalog};
pub use classifier::{BtlClassifier, ClassifierFactory, KeywordClassifier, RemoteClassifier};
pub use config::Config;
pub use difficulty::DifficultyFilter;
pub use errors::*;
pub use models::*;
pub use quiz_engine::{Clock, FixedClock, QuizEngine, SystemClock};
pub use quiz_service::{Progress, QuizService};
pub use state_codec::{StateCodec, StateFields};
pub use state_store::{ClientStateStore, SessionStateStore, StateStore};
