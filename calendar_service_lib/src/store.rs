use anyhow::{Error, format_err};
use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::{
    models::{Event, NewEvent, NewUser, User},
    pgpool::PgPool,
};

/// Persistence gateway for users and the events created on their behalf.
#[async_trait]
pub trait CalendarStore: Send + Sync {
    /// Find the user with the same `google_id` and update its token fields,
    /// or create it if none exists.
    async fn find_or_create_user(&self, user: NewUser) -> Result<User, Error>;

    async fn get_user_by_google_id(&self, google_id: &str) -> Result<Option<User>, Error>;

    async fn list_users(&self) -> Result<Vec<User>, Error>;

    async fn insert_event(&self, event: NewEvent) -> Result<Event, Error>;

    async fn get_event_by_event_id(&self, event_id: &str) -> Result<Option<Event>, Error>;

    async fn list_events_for_user(&self, user_id: i32) -> Result<Vec<Event>, Error>;
}

#[async_trait]
impl CalendarStore for PgPool {
    async fn find_or_create_user(&self, user: NewUser) -> Result<User, Error> {
        user.find_or_create(self).await
    }

    async fn get_user_by_google_id(&self, google_id: &str) -> Result<Option<User>, Error> {
        User::get_by_google_id(google_id, self).await
    }

    async fn list_users(&self) -> Result<Vec<User>, Error> {
        User::get_all(self).await
    }

    async fn insert_event(&self, event: NewEvent) -> Result<Event, Error> {
        event.insert(self).await
    }

    async fn get_event_by_event_id(&self, event_id: &str) -> Result<Option<Event>, Error> {
        Event::get_by_event_id(event_id, self).await
    }

    async fn list_events_for_user(&self, user_id: i32) -> Result<Vec<Event>, Error> {
        Event::get_by_user_id(user_id, self).await
    }
}

#[derive(Default, Debug)]
struct MemoryTables {
    users: Vec<User>,
    events: Vec<Event>,
}

/// Store kept in process memory, with the same uniqueness rules as the
/// database schema.
#[derive(Default, Debug)]
pub struct InMemoryStore {
    tables: RwLock<MemoryTables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CalendarStore for InMemoryStore {
    async fn find_or_create_user(&self, user: NewUser) -> Result<User, Error> {
        let now = OffsetDateTime::now_utc();
        let mut tables = self.tables.write().await;
        let email_taken = tables
            .users
            .iter()
            .any(|u| u.google_email == user.google_email && u.google_id != user.google_id);
        if email_taken {
            return Err(format_err!(
                "google_email {} already belongs to another user",
                user.google_email
            ));
        }
        if let Some(existing) = tables
            .users
            .iter_mut()
            .find(|u| u.google_id == user.google_id)
        {
            *existing = user.apply_to(existing.clone(), now);
            return Ok(existing.clone());
        }
        let id = tables.users.iter().map(|u| u.id).max().unwrap_or(0) + 1;
        let user = user.into_user(id, now);
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn get_user_by_google_id(&self, google_id: &str) -> Result<Option<User>, Error> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .find(|u| u.google_id.as_str() == google_id)
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, Error> {
        Ok(self.tables.read().await.users.clone())
    }

    async fn insert_event(&self, event: NewEvent) -> Result<Event, Error> {
        let mut tables = self.tables.write().await;
        if !tables.users.iter().any(|u| u.id == event.user_id) {
            return Err(format_err!("No user with id {}", event.user_id));
        }
        if tables.events.iter().any(|e| e.event_id == event.event_id) {
            return Err(format_err!("event_id {} is not unique", event.event_id));
        }
        let id = tables.events.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        let event = event.into_event(id);
        tables.events.push(event.clone());
        Ok(event)
    }

    async fn get_event_by_event_id(&self, event_id: &str) -> Result<Option<Event>, Error> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .iter()
            .find(|e| e.event_id.as_str() == event_id)
            .cloned())
    }

    async fn list_events_for_user(&self, user_id: i32) -> Result<Vec<Event>, Error> {
        let tables = self.tables.read().await;
        let mut events: Vec<_> = tables
            .events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.start_time, e.id));
        Ok(events)
    }
}
