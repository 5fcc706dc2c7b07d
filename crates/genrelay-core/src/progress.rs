//! Progress store trait — per-user learning-plan state.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Where a user is in their learning plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgress {
    pub current_course: Option<String>,
    /// 1-based day within the current course.
    pub current_day: u32,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub completed_days: Vec<u32>,
}

impl UserProgress {
    /// Fresh progress with no course selected, dated today.
    pub fn new() -> Self {
        Self {
            current_course: None,
            current_day: 1,
            start_date: Local::now().date_naive(),
            completed_days: Vec::new(),
        }
    }
}

impl Default for UserProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Key-value store of user progress, keyed by user id.
///
/// Backends are swappable without touching the code that reads and writes
/// progress.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, user_id: i64) -> Result<Option<UserProgress>>;

    async fn put(&self, user_id: i64, progress: &UserProgress) -> Result<()>;
}

#[async_trait]
impl<T: ProgressStore + ?Sized> ProgressStore for std::sync::Arc<T> {
    async fn get(&self, user_id: i64) -> Result<Option<UserProgress>> {
        (**self).get(user_id).await
    }

    async fn put(&self, user_id: i64, progress: &UserProgress) -> Result<()> {
        (**self).put(user_id, progress).await
    }
}

/// In-memory store for testing and single-process usage.
pub struct InMemoryProgressStore {
    users: std::sync::Mutex<HashMap<i64, UserProgress>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self {
            users: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn get(&self, user_id: i64) -> Result<Option<UserProgress>> {
        let users = self
            .users
            .lock()
            .map_err(|e| crate::error::GenRelayError::Store(e.to_string()))?;
        Ok(users.get(&user_id).cloned())
    }

    async fn put(&self, user_id: i64, progress: &UserProgress) -> Result<()> {
        let mut users = self
            .users
            .lock()
            .map_err(|e| crate::error::GenRelayError::Store(e.to_string()))?;
        users.insert(user_id, progress.clone());
        Ok(())
    }
}
