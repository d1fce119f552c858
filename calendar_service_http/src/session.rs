use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use log::debug;
use stack_string::StackString;
use std::{collections::HashMap, sync::Arc};
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session_id";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionData {
    /// Google id of the user who completed the login.
    pub user_id: Option<StackString>,
    /// State parameter sent with the most recent authorization redirect.
    pub oauth_state: Option<StackString>,
}

#[derive(Clone, Debug)]
struct SessionEntry {
    data: SessionData,
    expires_at: OffsetDateTime,
}

/// Server side sessions keyed by the value of the `session_id` cookie.
#[derive(Clone, Debug)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<StackString, SessionEntry>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn session_id(jar: &CookieJar) -> Option<StackString> {
        jar.get(SESSION_COOKIE).map(|c| c.value().into())
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionData> {
        let now = OffsetDateTime::now_utc();
        self.sessions
            .read()
            .await
            .get(session_id)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.data.clone())
    }

    /// Store `data` under `session_id` if that session is still live,
    /// otherwise under a freshly generated id. Returns the id used.
    pub async fn save(&self, session_id: Option<&str>, data: SessionData) -> StackString {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.sessions.write().await;
        let session_id: StackString = match session_id {
            Some(id) if sessions.get(id).is_some_and(|entry| entry.expires_at > now) => id.into(),
            _ => Uuid::new_v4().simple().to_string().into(),
        };
        let entry = SessionEntry {
            data,
            expires_at: now + self.ttl,
        };
        sessions.insert(session_id.clone(), entry);
        session_id
    }

    /// Drop `session_id` and store `data` under a new id.
    pub async fn rotate(&self, session_id: Option<&str>, data: SessionData) -> StackString {
        if let Some(id) = session_id {
            self.sessions.write().await.remove(id);
        }
        self.save(None, data).await
    }

    pub async fn remove_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!("removed {removed} expired sessions");
        }
        removed
    }

    pub fn cookie(&self, session_id: &str) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, session_id.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(self.ttl)
            .build()
    }
}
