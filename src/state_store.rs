use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::errors::QuizError;
use crate::models::QuizState;
use crate::quiz_engine::{Clock, SystemClock};
use crate::state_codec::StateCodec;

/// How long a session attempt outlives its deadline before it is swept.
pub const DEFAULT_RETENTION_SECONDS: i64 = 3600;
pub const DEFAULT_MAX_ATTEMPTS: usize = 10_000;

/// Where attempt progress lives between requests.
///
/// `save` returns the handle the client must present next time. A store may
/// reuse `previous` (session-backed) or mint a fresh handle every time
/// (client-carried, where the handle *is* the state).
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, previous: Option<&str>, state: &QuizState) -> Result<String, QuizError>;

    async fn load(&self, handle: &str) -> Result<QuizState, QuizError>;

    /// Forget an attempt that reached a terminal outcome.
    async fn discard(&self, handle: &str);

    fn kind(&self) -> &'static str;
}

/// Progress travels with the client as an encoded token; nothing is kept server side.
#[derive(Debug, Clone)]
pub struct ClientStateStore {
    codec: StateCodec,
}

impl ClientStateStore {
    pub fn new(codec: StateCodec) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl StateStore for ClientStateStore {
    async fn save(&self, _previous: Option<&str>, state: &QuizState) -> Result<String, QuizError> {
        self.codec.encode_token(state)
    }

    async fn load(&self, handle: &str) -> Result<QuizState, QuizError> {
        self.codec.decode_token(handle)
    }

    async fn discard(&self, _handle: &str) {}

    fn kind(&self) -> &'static str {
        "client"
    }
}

/// Progress kept in process memory, keyed by an attempt id handed to the client.
///
/// Attempts whose deadline passed more than `retention_seconds` ago are swept
/// on every access, whether or not their report was collected. When the map is
/// still full the attempt that started earliest is dropped.
#[derive(Clone)]
pub struct SessionStateStore {
    attempts: Arc<Mutex<HashMap<Uuid, QuizState>>>,
    clock: Arc<dyn Clock>,
    retention_seconds: i64,
    max_attempts: usize,
}

impl Default for SessionStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateStore {
    pub fn new() -> Self {
        Self::with_clock(
            Arc::new(SystemClock),
            DEFAULT_RETENTION_SECONDS,
            DEFAULT_MAX_ATTEMPTS,
        )
    }

    pub fn with_clock(clock: Arc<dyn Clock>, retention_seconds: i64, max_attempts: usize) -> Self {
        Self {
            attempts: Arc::new(Mutex::new(HashMap::new())),
            clock,
            retention_seconds: retention_seconds.max(0),
            max_attempts: max_attempts.max(1),
        }
    }

    fn sweep(&self, attempts: &mut HashMap<Uuid, QuizState>) {
        let cutoff = self
            .clock
            .now()
            .timestamp()
            .saturating_sub(self.retention_seconds);
        let before = attempts.len();
        attempts.retain(|_, state| state.deadline() > cutoff);
        let swept = before - attempts.len();
        if swept > 0 {
            debug!(swept, remaining = attempts.len(), "Swept expired quiz attempts");
        }
    }

    fn evict_earliest(attempts: &mut HashMap<Uuid, QuizState>) {
        if let Some(earliest) = attempts
            .iter()
            .min_by_key(|(_, state)| state.started_at)
            .map(|(id, _)| *id)
        {
            attempts.remove(&earliest);
            debug!(attempt = %earliest, "Evicted earliest quiz attempt");
        }
    }

    fn parse_handle(handle: &str) -> Result<Uuid, QuizError> {
        Uuid::parse_str(handle.trim())
            .map_err(|_| QuizError::malformed(format!("'{}' is not a valid attempt id", handle)))
    }
}

#[async_trait]
impl StateStore for SessionStateStore {
    /// A `previous` handle must still be held; a discarded or swept attempt is not revived.
    async fn save(&self, previous: Option<&str>, state: &QuizState) -> Result<String, QuizError> {
        let mut attempts = self.attempts.lock().await;
        self.sweep(&mut attempts);

        match previous {
            Some(handle) => {
                let id = Self::parse_handle(handle)?;
                let slot = attempts
                    .get_mut(&id)
                    .ok_or_else(|| QuizError::malformed(format!("no attempt with id '{}'", id)))?;
                *slot = state.clone();
                Ok(id.to_string())
            }
            None => {
                if attempts.len() >= self.max_attempts {
                    Self::evict_earliest(&mut attempts);
                }
                let id = Uuid::new_v4();
                attempts.insert(id, state.clone());
                Ok(id.to_string())
            }
        }
    }

    async fn load(&self, handle: &str) -> Result<QuizState, QuizError> {
        let id = Self::parse_handle(handle)?;
        let mut attempts = self.attempts.lock().await;
        self.sweep(&mut attempts);
        attempts
            .get(&id)
            .cloned()
            .ok_or_else(|| QuizError::malformed(format!("no attempt with id '{}'", id)))
    }

    async fn discard(&self, handle: &str) {
        if let Ok(id) = Self::parse_handle(handle) {
            self.attempts.lock().await.remove(&id);
        }
    }

    fn kind(&self) -> &'static str {
        "session"
    }
}
