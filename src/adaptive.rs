use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::QuestionCatalog;
use crate::difficulty::DifficultyFilter;
use crate::errors::QuizError;
use crate::{log_service_start, log_service_success, log_service_warn};
use crate::models::PreferenceVector;

/// Filtered pool remembered for one session.
#[derive(Debug, Clone)]
struct CachedPool {
    preferences: PreferenceVector,
    catalog_revision: u64,
    question_ids: Vec<String>,
    trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct StoredPreferences {
    vector: PreferenceVector,
    updated_at: DateTime<Utc>,
}

/// Per-session preference storage and the filtered-pool cache that hangs off it.
///
/// Everything is keyed by an explicit session id. Replacing or clearing a
/// session's preferences drops its cached pool; a pool is also discarded when
/// the catalog has been appended to since it was computed.
///
/// At most `max_sessions` sessions keep preferences; the least recently updated
/// one is forgotten to make room. Cached pools are capped separately and the
/// oldest-trained pool goes first.
#[derive(Clone)]
pub struct AdaptivePool {
    filter: DifficultyFilter,
    preferences: Arc<RwLock<HashMap<Uuid, StoredPreferences>>>,
    cache: Arc<RwLock<HashMap<Uuid, CachedPool>>>,
    max_sessions: usize,
    max_cached_pools: usize,
}

impl AdaptivePool {
    pub fn new(filter: DifficultyFilter, max_sessions: usize) -> Self {
        Self {
            filter,
            preferences: Arc::new(RwLock::new(HashMap::new())),
            cache: Arc::new(RwLock::new(HashMap::new())),
            max_sessions: max_sessions.max(1),
            max_cached_pools: max_sessions.max(1),
        }
    }

    pub fn with_cache_limit(mut self, max_cached_pools: usize) -> Self {
        self.max_cached_pools = max_cached_pools.max(1);
        self
    }

    pub async fn set_preferences(
        &self,
        session_id: Uuid,
        preferences: PreferenceVector,
    ) -> Result<(), QuizError> {
        if !preferences.is_valid() {
            return Err(QuizError::Validation(
                "preference weights must be finite and non-negative".to_string(),
            ));
        }

        let (previous, evicted) = {
            let mut stored = self.preferences.write().await;
            let evicted = if stored.len() >= self.max_sessions && !stored.contains_key(&session_id) {
                Self::evict_stalest_session(&mut stored)
            } else {
                None
            };
            let previous = stored.insert(
                session_id,
                StoredPreferences {
                    vector: preferences,
                    updated_at: Utc::now(),
                },
            );
            (previous.map(|p| p.vector), evicted)
        };

        if evicted.is_some() || previous != Some(preferences) {
            let mut cache = self.cache.write().await;
            if let Some(evicted) = evicted {
                cache.remove(&evicted);
            }
            if previous != Some(preferences) {
                cache.remove(&session_id);
                debug!(session_id = %session_id, "Preferences changed, cached pool invalidated");
            }
        }
        Ok(())
    }

    pub async fn get_preferences(&self, session_id: Uuid) -> Option<PreferenceVector> {
        self.preferences
            .read()
            .await
            .get(&session_id)
            .map(|stored| stored.vector)
    }

    /// Returns whether the session had preferences.
    pub async fn clear_preferences(&self, session_id: Uuid) -> bool {
        let removed = self.preferences.write().await.remove(&session_id).is_some();
        self.cache.write().await.remove(&session_id);
        removed
    }

    /// Candidate question ids for the session, or `None` when it has no preferences.
    pub async fn candidate_pool(
        &self,
        session_id: Uuid,
        catalog: Arc<QuestionCatalog>,
    ) -> Option<Vec<String>> {
        let preferences = self.get_preferences(session_id).await?;

        if let Some(cached) = self.cache.read().await.get(&session_id) {
            if cached.preferences == preferences && cached.catalog_revision == catalog.revision() {
                debug!(session_id = %session_id, "Filtered pool cache hit");
                return Some(cached.question_ids.clone());
            }
        }

        debug!(session_id = %session_id, "Filtered pool cache miss");
        log_service_start!("adaptive_pool", "train");
        let started = std::time::Instant::now();
        let filter = self.filter.clone();
        let training_catalog = catalog.clone();
        let question_ids = match tokio::task::spawn_blocking(move || {
            filter.filter(training_catalog.all(), &preferences)
        })
        .await
        {
            Ok(ids) => ids,
            Err(e) => {
                log_service_warn!("adaptive_pool", "train", error = e, "returning unfiltered question pool");
                return Some(catalog.all().iter().map(|q| q.id.clone()).collect());
            }
        };

        // Preferences may have changed while training; only cache a result that still applies.
        if self.get_preferences(session_id).await == Some(preferences) {
            let mut cache = self.cache.write().await;
            if cache.len() >= self.max_cached_pools && !cache.contains_key(&session_id) {
                Self::evict_oldest(&mut cache);
            }
            cache.insert(
                session_id,
                CachedPool {
                    preferences,
                    catalog_revision: catalog.revision(),
                    question_ids: question_ids.clone(),
                    trained_at: Utc::now(),
                },
            );
            info!(
                session_id = %session_id,
                pool_size = question_ids.len(),
                catalog_size = catalog.len(),
                "Cached filtered question pool"
            );
            log_service_success!(
                "adaptive_pool",
                "train",
                question_count = question_ids.len(),
                duration_ms = started.elapsed().as_millis() as u64
            );
        }

        Some(question_ids)
    }

    pub async fn get_stats(&self) -> AdaptiveStats {
        AdaptiveStats {
            sessions_with_preferences: self.preferences.read().await.len(),
            cached_pools: self.cache.read().await.len(),
            max_sessions: self.max_sessions,
            max_cached_pools: self.max_cached_pools,
        }
    }

    fn evict_stalest_session(stored: &mut HashMap<Uuid, StoredPreferences>) -> Option<Uuid> {
        let stalest = stored
            .iter()
            .min_by_key(|(_, entry)| entry.updated_at)
            .map(|(key, _)| *key)?;
        stored.remove(&stalest);
        debug!(session_id = %stalest, "Forgot preferences of least recently updated session");
        Some(stalest)
    }

    fn evict_oldest(cache: &mut HashMap<Uuid, CachedPool>) {
        if let Some(oldest_key) = cache
            .iter()
            .min_by_key(|(_, cached)| cached.trained_at)
            .map(|(key, _)| *key)
        {
            cache.remove(&oldest_key);
            debug!("Evicted oldest cached pool for session {}", oldest_key);
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AdaptiveStats {
    pub sessions_with_preferences: usize,
    pub cached_pools: usize,
    pub max_sessions: usize,
    pub max_cached_pools: usize,
}
