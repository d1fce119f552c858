use anyhow::Error;
use stack_string::{StackString, format_sstr};
use std::fmt;
use time::OffsetDateTime;
use tokio_postgres::Row;

use gcal_lib::{datetimetype::sentinel_datetime, oauth::Token};

use crate::pgpool::PgPool;

const USER_COLUMNS: &str = "id, google_id, google_email, access_token, refresh_token, \
                            token_expiry, created_at, updated_at";
const EVENT_COLUMNS: &str = "id, user_id, event_id, summary, description, start_time, end_time, \
                             guest_email, created_at";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: i32,
    pub google_id: StackString,
    pub google_email: StackString,
    pub access_token: StackString,
    pub refresh_token: StackString,
    pub token_expiry: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} expires {}",
            self.id, self.google_id, self.google_email, self.token_expiry
        )
    }
}

impl User {
    fn from_row(row: &Row) -> Result<Self, Error> {
        Ok(Self {
            id: row.try_get("id")?,
            google_id: row.try_get("google_id")?,
            google_email: row.try_get("google_email")?,
            access_token: row.try_get("access_token")?,
            refresh_token: row.try_get("refresh_token")?,
            token_expiry: row.try_get("token_expiry")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Stored OAuth2 token for building an authenticated calendar client.
    pub fn token(&self) -> Token {
        Token::new(&self.access_token, &self.refresh_token, self.token_expiry)
    }

    pub async fn get_by_google_id(google_id: &str, pool: &PgPool) -> Result<Option<Self>, Error> {
        let query = format_sstr!("SELECT {USER_COLUMNS} FROM users WHERE google_id = $1");
        let conn = pool.get().await?;
        conn.query_opt(query.as_str(), &[&google_id])
            .await?
            .map(|row| Self::from_row(&row))
            .transpose()
    }

    pub async fn get_all(pool: &PgPool) -> Result<Vec<Self>, Error> {
        let query = format_sstr!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
        let conn = pool.get().await?;
        conn.query(query.as_str(), &[])
            .await?
            .iter()
            .map(Self::from_row)
            .collect()
    }
}

/// Login result to be matched against stored users by `google_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUser {
    pub google_id: StackString,
    pub google_email: StackString,
    pub access_token: StackString,
    pub refresh_token: StackString,
    pub token_expiry: OffsetDateTime,
}

impl NewUser {
    pub fn new(google_id: &str, google_email: &str, token: &Token) -> Self {
        Self {
            google_id: google_id.into(),
            google_email: google_email.into(),
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            token_expiry: token.expiry,
        }
    }

    /// Apply this login to an existing user. Empty strings and the zero
    /// expiry leave the stored value in place.
    pub fn apply_to(self, mut user: User, now: OffsetDateTime) -> User {
        fn assign(target: &mut StackString, value: StackString) {
            if !value.is_empty() {
                *target = value;
            }
        }
        assign(&mut user.google_email, self.google_email);
        assign(&mut user.access_token, self.access_token);
        assign(&mut user.refresh_token, self.refresh_token);
        if self.token_expiry != sentinel_datetime() {
            user.token_expiry = self.token_expiry;
        }
        user.updated_at = now;
        user
    }

    pub fn into_user(self, id: i32, now: OffsetDateTime) -> User {
        User {
            id,
            google_id: self.google_id,
            google_email: self.google_email,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_expiry: self.token_expiry,
            created_at: now,
            updated_at: now,
        }
    }

    /// Insert the user, or update the token fields of the row with the same
    /// `google_id`, following the same rules as [`NewUser::apply_to`].
    pub async fn find_or_create(self, pool: &PgPool) -> Result<User, Error> {
        let query = format_sstr!(
            r#"
                INSERT INTO users (google_id, google_email, access_token, refresh_token, token_expiry)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (google_id) DO UPDATE SET
                    google_email = CASE WHEN EXCLUDED.google_email = ''
                        THEN users.google_email ELSE EXCLUDED.google_email END,
                    access_token = CASE WHEN EXCLUDED.access_token = ''
                        THEN users.access_token ELSE EXCLUDED.access_token END,
                    refresh_token = CASE WHEN EXCLUDED.refresh_token = ''
                        THEN users.refresh_token ELSE EXCLUDED.refresh_token END,
                    token_expiry = CASE WHEN EXCLUDED.token_expiry = $6
                        THEN users.token_expiry ELSE EXCLUDED.token_expiry END,
                    updated_at = now()
                RETURNING {USER_COLUMNS}
            "#
        );
        let sentinel = sentinel_datetime();
        let conn = pool.get().await?;
        let row = conn
            .query_one(
                query.as_str(),
                &[
                    &self.google_id,
                    &self.google_email,
                    &self.access_token,
                    &self.refresh_token,
                    &self.token_expiry,
                    &sentinel,
                ],
            )
            .await?;
        User::from_row(&row)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub id: i32,
    pub user_id: i32,
    pub event_id: StackString,
    pub summary: StackString,
    pub description: StackString,
    pub start_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
    pub guest_email: StackString,
    pub created_at: OffsetDateTime,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} - {} {} guest: {}",
            self.event_id, self.start_time, self.end_time, self.summary, self.guest_email
        )
    }
}

impl Event {
    fn from_row(row: &Row) -> Result<Self, Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            event_id: row.try_get("event_id")?,
            summary: row.try_get("summary")?,
            description: row.try_get("description")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            guest_email: row.try_get("guest_email")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub async fn get_by_event_id(event_id: &str, pool: &PgPool) -> Result<Option<Self>, Error> {
        let query = format_sstr!("SELECT {EVENT_COLUMNS} FROM events WHERE event_id = $1");
        let conn = pool.get().await?;
        conn.query_opt(query.as_str(), &[&event_id])
            .await?
            .map(|row| Self::from_row(&row))
            .transpose()
    }

    pub async fn get_by_user_id(user_id: i32, pool: &PgPool) -> Result<Vec<Self>, Error> {
        let query = format_sstr!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = $1 ORDER BY start_time, id"
        );
        let conn = pool.get().await?;
        conn.query(query.as_str(), &[&user_id])
            .await?
            .iter()
            .map(Self::from_row)
            .collect()
    }
}

/// Local record of an event that was accepted by the remote calendar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEvent {
    pub user_id: i32,
    pub event_id: StackString,
    pub summary: StackString,
    pub description: StackString,
    pub start_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
    pub guest_email: StackString,
    pub created_at: OffsetDateTime,
}

impl NewEvent {
    pub fn into_event(self, id: i32) -> Event {
        Event {
            id,
            user_id: self.user_id,
            event_id: self.event_id,
            summary: self.summary,
            description: self.description,
            start_time: self.start_time,
            end_time: self.end_time,
            guest_email: self.guest_email,
            created_at: self.created_at,
        }
    }

    pub async fn insert(self, pool: &PgPool) -> Result<Event, Error> {
        let query = format_sstr!(
            r#"
                INSERT INTO events (
                    user_id, event_id, summary, description, start_time, end_time,
                    guest_email, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING {EVENT_COLUMNS}
            "#
        );
        let conn = pool.get().await?;
        let row = conn
            .query_one(
                query.as_str(),
                &[
                    &self.user_id,
                    &self.event_id,
                    &self.summary,
                    &self.description,
                    &self.start_time,
                    &self.end_time,
                    &self.guest_email,
                    &self.created_at,
                ],
            )
            .await?;
        Event::from_row(&row)
    }
}
