use anyhow::{Error, format_err};
use log::debug;
use reqwest::{Client, header::AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stack_string::StackString;
use url::Url;

use crate::{
    datetimetype::DateTimeType,
    handle_response,
    oauth::{GoogleOAuth, Token},
};

pub const GCAL_API_URL: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<StackString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<StackString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<StackString>,
}

impl EventDateTime {
    pub fn utc(dt: DateTimeType) -> Self {
        Self {
            date: None,
            date_time: Some(StackString::from_display(dt)),
            time_zone: Some("UTC".into()),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventAttendee {
    pub email: StackString,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Calendar v3 event resource. Fields not modelled here are kept in `extra`
/// so the full representation returned by google survives a round trip.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<StackString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<StackString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<StackString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<EventDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<EventDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendees: Option<Vec<EventAttendee>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn non_empty(s: &str) -> Option<StackString> {
    if s.is_empty() { None } else { Some(s.into()) }
}

impl Event {
    /// Event in UTC with at most one attendee.
    pub fn new(
        summary: &str,
        description: &str,
        start: DateTimeType,
        end: DateTimeType,
        guest_email: &str,
    ) -> Self {
        let attendees = non_empty(guest_email).map(|email| {
            vec![EventAttendee {
                email,
                extra: Map::new(),
            }]
        });
        Self {
            summary: non_empty(summary),
            description: non_empty(description),
            start: Some(EventDateTime::utc(start)),
            end: Some(EventDateTime::utc(end)),
            attendees,
            ..Self::default()
        }
    }
}

/// Calendar api client bound to one user's token.
#[derive(Clone, Debug)]
pub struct GCalendarInstance {
    client: Client,
    api_url: Url,
    token: Token,
}

impl GCalendarInstance {
    /// # Errors
    /// Returns error if `api_url` is not a valid base url
    pub fn new(client: Client, api_url: &str, token: Token) -> Result<Self, Error> {
        let api_url: Url = api_url.parse()?;
        if api_url.cannot_be_a_base() {
            return Err(format_err!("{api_url} cannot be a base url"));
        }
        Ok(Self {
            client,
            api_url,
            token,
        })
    }

    /// Build an instance from a stored token, refreshing it first if it has
    /// already expired.
    ///
    /// # Errors
    /// Returns error if the url is invalid or the refresh fails
    pub async fn authorized(oauth: &GoogleOAuth, api_url: &str, token: Token) -> Result<Self, Error> {
        let token = oauth.valid_token(token).await?;
        Self::new(oauth.client().clone(), api_url, token)
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    fn events_url(&self, gcal_id: &str) -> Result<Url, Error> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| format_err!("{} cannot be a base url", self.api_url))?
            .pop_if_empty()
            .extend(&["calendars", gcal_id, "events"]);
        Ok(url)
    }

    /// # Errors
    /// Returns error on transport failure or a non-success response
    pub async fn insert_gcal_event(&self, gcal_id: &str, gcal_event: &Event) -> Result<Event, Error> {
        let url = self.events_url(gcal_id)?;
        debug!("insert event into {url}");
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.token.authorization().as_str())
            .json(gcal_event)
            .send()
            .await?;
        handle_response(response, "event insert").await
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Error;
    use reqwest::Client;
    use serde_json::json;
    use time::{Duration as TimeDuration, OffsetDateTime, macros::datetime};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    use crate::{
        datetimetype::{DateTimeType, sentinel_datetime},
        gcal_instance::{Event, GCalendarInstance},
        oauth::{GoogleEndpoints, GoogleOAuth, Token},
    };

    fn standup() -> Event {
        Event::new(
            "Standup",
            "",
            datetime!(2024-01-01 09:00:00 UTC).into(),
            datetime!(2024-01-01 09:30:00 UTC).into(),
            "b@x.com",
        )
    }

    #[test]
    fn test_event_serialization() -> Result<(), Error> {
        let value = serde_json::to_value(standup())?;
        assert_eq!(
            value,
            json!({
                "summary": "Standup",
                "start": {"dateTime": "2024-01-01T09:00:00Z", "timeZone": "UTC"},
                "end": {"dateTime": "2024-01-01T09:30:00Z", "timeZone": "UTC"},
                "attendees": [{"email": "b@x.com"}],
            })
        );

        let no_guest = Event::new(
            "",
            "",
            DateTimeType::from(sentinel_datetime()),
            DateTimeType::from(sentinel_datetime()),
            "",
        );
        assert!(no_guest.attendees.is_none());
        assert!(no_guest.summary.is_none());
        Ok(())
    }

    #[test]
    fn test_event_keeps_unknown_fields() -> Result<(), Error> {
        let body = json!({
            "kind": "calendar#event",
            "id": "evt-1",
            "htmlLink": "https://www.google.com/calendar/event?eid=evt-1",
            "status": "confirmed",
            "summary": "Standup",
            "attendees": [{"email": "b@x.com", "responseStatus": "needsAction"}],
        });
        let event: Event = serde_json::from_value(body.clone())?;
        assert_eq!(event.id.as_ref().map(|s| s.as_str()), Some("evt-1"));
        assert_eq!(serde_json::to_value(&event)?, body);
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_gcal_event() -> Result<(), Error> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendar/v3/calendars/primary/events"))
            .and(header("authorization", "Bearer at-1"))
            .and(body_partial_json(json!({
                "summary": "Standup",
                "attendees": [{"email": "b@x.com"}],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "calendar#event",
                "id": "evt-1",
                "summary": "Standup",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api_url = format!("{}/calendar/v3", server.uri());
        let token = Token::new("at-1", "rt-1", sentinel_datetime());
        let gcal = GCalendarInstance::new(Client::new(), &api_url, token)?;
        let event = gcal.insert_gcal_event("primary", &standup()).await?;
        assert_eq!(event.id.as_ref().map(|s| s.as_str()), Some("evt-1"));
        assert_eq!(event.extra["kind"], "calendar#event");
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_gcal_event_escapes_calendar_id() -> Result<(), Error> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendars/team%2Fcal/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "evt-2"})))
            .expect(1)
            .mount(&server)
            .await;

        let token = Token::new("at-1", "", sentinel_datetime());
        let gcal = GCalendarInstance::new(Client::new(), &server.uri(), token)?;
        let event = gcal.insert_gcal_event("team/cal", &standup()).await?;
        assert_eq!(event.id.as_ref().map(|s| s.as_str()), Some("evt-2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_gcal_event_failure() -> Result<(), Error> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
            .mount(&server)
            .await;

        let token = Token::new("at-1", "", sentinel_datetime());
        let gcal = GCalendarInstance::new(Client::new(), &server.uri(), token)?;
        let err = gcal.insert_gcal_event("primary", &standup()).await.unwrap_err();
        assert!(err.to_string().contains("401"));
        Ok(())
    }

    #[tokio::test]
    async fn test_authorized_refreshes_expired_token() -> Result<(), Error> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-2",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let uri = server.uri();
        let endpoints = GoogleEndpoints::new(
            &format!("{uri}/auth"),
            &format!("{uri}/token"),
            &format!("{uri}/userinfo"),
        )?;
        let oauth = GoogleOAuth::new(
            "id",
            "secret",
            "http://localhost/redirect",
            endpoints,
            std::time::Duration::from_secs(5),
        )?;
        let token = Token::new(
            "at-1",
            "rt-1",
            OffsetDateTime::now_utc() - TimeDuration::hours(2),
        );
        let gcal = GCalendarInstance::authorized(&oauth, &uri, token).await?;
        assert_eq!(gcal.token().access_token.as_str(), "at-2");
        assert_eq!(gcal.token().refresh_token.as_str(), "rt-1");
        Ok(())
    }
}
