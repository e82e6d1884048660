//! Session persistence for the authentication surface — an analogous but
//! separate store from [`crate::storage`], keyed by session id rather than
//! host.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(24 * 60 * 60);
const CLEANUP_SCAN_CAP: usize = 1000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub metadata: Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Outcome of a `create` call.
pub struct CreatedSession {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    pub session: Session,
}

/// Outcome of a `validate` call. `reason` is populated only when `!valid`.
#[derive(Debug, PartialEq, Eq)]
pub enum ValidationReason {
    NoId,
    NotFound,
    Expired,
}

pub struct Validation {
    pub valid: bool,
    pub session: Option<Session>,
    pub reason: Option<ValidationReason>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
}

/// In-memory session store. `validate` is authoritative: it never returns
/// `valid: true` for an expired row even if `cleanup_expired` has not yet
/// run, and it destroys the expired row it discovers along the way.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<FxHashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(
        &self,
        user_id: impl Into<String>,
        metadata: Option<Value>,
        ip: Option<String>,
        user_agent: Option<String>,
        duration: Option<Duration>,
    ) -> CreatedSession {
        let now = Utc::now();
        let duration = duration.unwrap_or(DEFAULT_SESSION_DURATION);
        let expires_at = now + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::hours(24));
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            metadata: metadata.unwrap_or(Value::Null),
            ip,
            user_agent,
            created_at: now,
            expires_at,
        };

        self.sessions.write().await.insert(session.id.clone(), session.clone());

        CreatedSession {
            session_id: session.id.clone(),
            expires_at,
            session,
        }
    }

    pub async fn validate(&self, session_id: &str) -> Validation {
        if session_id.is_empty() {
            return Validation { valid: false, session: None, reason: Some(ValidationReason::NoId) };
        }

        let now = Utc::now();
        let expired = {
            let sessions = self.sessions.read().await;
            match sessions.get(session_id) {
                None => return Validation { valid: false, session: None, reason: Some(ValidationReason::NotFound) },
                Some(session) => session.is_expired(now),
            }
        };

        if expired {
            self.sessions.write().await.remove(session_id);
            return Validation { valid: false, session: None, reason: Some(ValidationReason::Expired) };
        }

        let session = self.sessions.read().await.get(session_id).cloned();
        Validation { valid: true, session, reason: None }
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn update(&self, session_id: &str, metadata_patch: Value) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id).ok_or(SessionError::NotFound)?;
        session.metadata = merge_metadata(&session.metadata, &metadata_patch);
        Ok(session.clone())
    }

    pub async fn destroy(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn destroy_user_sessions(&self, user_id: &str) -> usize {
        let mut sessions = self.sessions.write().await;
        let to_remove: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.user_id == user_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &to_remove {
            sessions.remove(id);
        }
        to_remove.len()
    }

    pub async fn get_user_sessions(&self, user_id: &str) -> Vec<Session> {
        let now = Utc::now();
        let expired: Vec<String>;
        let active: Vec<Session>;
        {
            let sessions = self.sessions.read().await;
            expired = sessions
                .iter()
                .filter(|(_, s)| s.user_id == user_id && s.is_expired(now))
                .map(|(id, _)| id.clone())
                .collect();
            active = sessions
                .iter()
                .filter(|(_, s)| s.user_id == user_id && !s.is_expired(now))
                .map(|(_, s)| s.clone())
                .collect();
        }
        if !expired.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in &expired {
                sessions.remove(id);
            }
        }
        active
    }

    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .iter()
            .take(CLEANUP_SCAN_CAP)
            .filter(|(_, s)| s.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        expired.len()
    }
}

fn merge_metadata(current: &Value, patch: &Value) -> Value {
    match (current, patch) {
        (Value::Object(current_map), Value::Object(patch_map)) => {
            let mut merged: BTreeMap<String, Value> = current_map.clone().into_iter().collect();
            for (k, v) in patch_map {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged.into_iter().collect())
        }
        _ => patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_validate_succeeds() {
        let store = SessionStore::new();
        let created = store.create("user-1", None, None, None, None).await;
        let validation = store.validate(&created.session_id).await;
        assert!(validation.valid);
        assert_eq!(validation.session.unwrap().user_id, "user-1");
    }

    #[tokio::test]
    async fn validate_is_authoritative_for_expired_sessions() {
        let store = SessionStore::new();
        let created = store.create("user-1", None, None, None, Some(Duration::from_millis(0))).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let validation = store.validate(&created.session_id).await;
        assert!(!validation.valid);
        assert_eq!(validation.reason, Some(ValidationReason::Expired));

        assert!(store.get(&created.session_id).await.is_none());
    }

    #[tokio::test]
    async fn validate_missing_id_reports_no_id() {
        let store = SessionStore::new();
        let validation = store.validate("").await;
        assert_eq!(validation.reason, Some(ValidationReason::NoId));
    }

    #[tokio::test]
    async fn update_merges_metadata_patch() {
        let store = SessionStore::new();
        let created = store
            .create("user-1", Some(serde_json::json!({ "role": "admin" })), None, None, None)
            .await;
        store
            .update(&created.session_id, serde_json::json!({ "theme": "dark" }))
            .await
            .unwrap();
        let session = store.get(&created.session_id).await.unwrap();
        assert_eq!(session.metadata["role"], "admin");
        assert_eq!(session.metadata["theme"], "dark");
    }

    #[tokio::test]
    async fn destroy_user_sessions_removes_all_matching() {
        let store = SessionStore::new();
        store.create("user-1", None, None, None, None).await;
        store.create("user-1", None, None, None, None).await;
        store.create("user-2", None, None, None, None).await;

        let removed = store.destroy_user_sessions("user-1").await;
        assert_eq!(removed, 2);
        assert_eq!(store.get_user_sessions("user-2").await.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_expired_destroys_only_expired_rows() {
        let store = SessionStore::new();
        store.create("user-1", None, None, None, Some(Duration::from_millis(0))).await;
        let fresh = store.create("user-2", None, None, None, None).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let removed = store.cleanup_expired().await;
        assert_eq!(removed, 1);
        assert!(store.get(&fresh.session_id).await.is_some());
    }
}
