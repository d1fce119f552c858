use axum::{
    extract::{Form, FromRequest, Json, Multipart, Query, Request, State},
    http::{
        StatusCode,
        header::{CONTENT_TYPE, LOCATION},
    },
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use derive_more::{From, Into};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use stack_string::{StackString, format_sstr};
use time::OffsetDateTime;
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use uuid::Uuid;

use calendar_service_lib::models::{NewEvent, NewUser};
use gcal_lib::{
    datetimetype::{DateTimeType, convert_str_to_datetime},
    gcal_instance::{Event, GCalendarInstance},
};

use crate::{
    app::AppState,
    errors::ServiceError as Error,
    session::{SessionData, SessionStore},
};

pub const USER_ID_HEADER: &str = "x-user-id";

type HttpResult<T> = Result<T, Error>;

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

async fn load_session(state: &AppState, jar: &CookieJar) -> (Option<StackString>, SessionData) {
    let session_id = SessionStore::session_id(jar);
    let data = match &session_id {
        Some(id) => state.sessions.get(id).await.unwrap_or_default(),
        None => SessionData::default(),
    };
    (session_id, data)
}

/// Start the OAuth2 authorization code flow.
#[utoipa::path(
    get,
    path = "/google-login",
    responses(
        (status = 302, description = "Redirect to the google authorization page"),
        Error,
    )
)]
async fn google_login(State(state): State<AppState>, jar: CookieJar) -> HttpResult<Response> {
    let oauth_state: StackString = Uuid::new_v4().simple().to_string().into();
    let url = state.oauth.auth_code_url(&oauth_state);
    debug!("redirect to {url}");

    if !state.config.validate_oauth_state {
        return Ok(found(url.as_str()));
    }
    let (session_id, mut session) = load_session(&state, &jar).await;
    session.oauth_state = Some(oauth_state);
    let session_id = state
        .sessions
        .save(session_id.as_ref().map(StackString::as_str), session)
        .await;
    let jar = jar.add(state.sessions.cookie(&session_id));
    Ok((jar, found(url.as_str())).into_response())
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct RedirectQuery {
    /// Authorization code issued by google
    code: Option<StackString>,
    /// State value echoed back from the login redirect
    state: Option<StackString>,
}

/// Exchange the authorization code, store the user's tokens and remember
/// the user in the session.
#[utoipa::path(
    get,
    path = "/google/redirect",
    params(RedirectQuery),
    responses(
        (status = 302, description = "Login complete, redirect to the calendar ui"),
        Error,
    )
)]
async fn google_redirect(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<RedirectQuery>,
) -> HttpResult<Response> {
    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        error!("No code in query parameters");
        return Err(Error::BadRequest("No code in query parameters".into()));
    };
    let (session_id, mut session) = load_session(&state, &jar).await;

    let expected_state = session.oauth_state.take();
    if state.config.validate_oauth_state
        && (expected_state.is_none() || expected_state != query.state)
    {
        error!("state parameter does not match session");
        return Err(Error::BadRequest("Invalid state parameter".into()));
    }

    let token = state
        .oauth
        .exchange(&code)
        .await
        .map_err(|e| Error::internal("Failed to exchange token", e))?;
    let user_info = state
        .oauth
        .user_info(&token)
        .await
        .map_err(|e| Error::internal("Unable to retrieve user info", e))?;

    let new_user = NewUser::new(&user_info.id, &user_info.email, &token);
    let user = state
        .store
        .find_or_create_user(new_user)
        .await
        .map_err(|e| Error::internal("Failed to store token in the database", e))?;
    info!("login {user}");

    session.user_id = Some(user.google_id);
    let session_id = state
        .sessions
        .rotate(session_id.as_ref().map(StackString::as_str), session)
        .await;
    let jar = jar.add(state.sessions.cookie(&session_id));
    Ok((jar, found(&state.config.calendar_ui_url)).into_response())
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
struct CreateEventForm {
    summary: StackString,
    description: StackString,
    /// RFC3339 start time
    start: StackString,
    /// RFC3339 end time
    end: StackString,
    /// Single attendee e-mail, may be empty
    guest: StackString,
}

impl CreateEventForm {
    fn set(&mut self, name: &str, value: StackString) {
        match name {
            "summary" => self.summary = value,
            "description" => self.description = value,
            "start" => self.start = value,
            "end" => self.end = value,
            "guest" => self.guest = value,
            _ => {}
        }
    }

    /// Keep each non-empty field, filling empty ones from `other`.
    fn or(self, other: Self) -> Self {
        fn pick(a: StackString, b: StackString) -> StackString {
            if a.is_empty() { b } else { a }
        }
        Self {
            summary: pick(self.summary, other.summary),
            description: pick(self.description, other.description),
            start: pick(self.start, other.start),
            end: pick(self.end, other.end),
            guest: pick(self.guest, other.guest),
        }
    }

    /// Read the event fields from the query string, then from an urlencoded
    /// or multipart body. The first non-empty value of each field wins.
    async fn read_request(request: Request) -> HttpResult<Self> {
        let Query(query) = Query::<Self>::try_from_uri(request.uri()).map_err(|e| {
            error!("unreadable query string: {e}");
            Error::BadRequest("Invalid event form".into())
        })?;
        let content_type = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let body = if content_type.starts_with("multipart/form-data") {
            Self::from_multipart(request).await?
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(form) = Form::<Self>::from_request(request, &()).await.map_err(|e| {
                error!("unreadable event form: {e}");
                Error::BadRequest("Invalid event form".into())
            })?;
            form
        } else {
            Self::default()
        };
        Ok(query.or(body))
    }

    async fn from_multipart(request: Request) -> HttpResult<Self> {
        fn bad_multipart(e: impl std::fmt::Display) -> Error {
            error!("unreadable multipart event form: {e}");
            Error::BadRequest("Invalid event form".into())
        }
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(bad_multipart)?;
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
            let Some(name) = field.name().map(ToString::to_string) else {
                continue;
            };
            let value = field.text().await.map_err(bad_multipart)?;
            form.set(&name, value.into());
        }
        Ok(form)
    }
}

/// Event resource as returned by google calendar.
#[derive(Debug, Serialize, ToSchema, From, Into)]
#[schema(value_type = Object)]
pub struct CalendarEvent(Event);

fn parse_timestamp(s: &str, strict: bool) -> HttpResult<DateTimeType> {
    if strict {
        convert_str_to_datetime(s).map(Into::into).map_err(|e| {
            error!("invalid timestamp {s:?}: {e}");
            Error::BadRequest(format_sstr!("Invalid timestamp {s}"))
        })
    } else {
        Ok(DateTimeType::parse_or_sentinel(s))
    }
}

/// Insert an event into the user's calendar and record it locally.
#[utoipa::path(
    post,
    path = "/create-event",
    params(
        ("X-User-Id" = String, Header, description = "Google id of the calendar owner"),
    ),
    request_body(
        content = CreateEventForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Fields may also be sent as multipart/form-data or in the query string",
    ),
    responses(
        (status = 200, description = "Event created", body = CalendarEvent),
        Error,
    )
)]
async fn create_event(
    State(state): State<AppState>,
    request: Request,
) -> HttpResult<Json<CalendarEvent>> {
    let Some(user_id) = request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(StackString::from)
    else {
        error!("user_id not found in header");
        return Err(Error::Unauthorized("user_id not found in header".into()));
    };

    let form = CreateEventForm::read_request(request).await?;
    let strict = state.config.strict_timestamps;
    let start = parse_timestamp(&form.start, strict)?;
    let end = parse_timestamp(&form.end, strict)?;

    let user = state
        .store
        .get_user_by_google_id(&user_id)
        .await
        .map_err(|e| Error::internal("Failed to retrieve user", e))?
        .ok_or_else(|| {
            Error::internal("Failed to retrieve user", format_sstr!("no user {user_id}"))
        })?;

    let gcal = GCalendarInstance::authorized(&state.oauth, &state.config.gcal_api_url, user.token())
        .await
        .map_err(|e| Error::internal("Unable to create calendar service", e))?;

    let event = Event::new(
        &form.summary,
        &form.description,
        start,
        end,
        &form.guest,
    );
    let created = gcal
        .insert_gcal_event(&state.config.calendar_id, &event)
        .await
        .map_err(|e| Error::internal("Unable to create event", e))?;
    let event_id = created.id.clone().unwrap_or_default();
    info!("created event {event_id} for {}", user.google_id);

    let local = NewEvent {
        user_id: user.id,
        event_id: event_id.clone(),
        summary: form.summary,
        description: form.description,
        start_time: start.into(),
        end_time: end.into(),
        guest_email: form.guest,
        created_at: OffsetDateTime::now_utc(),
    };
    state.store.insert_event(local).await.map_err(|e| {
        error!("event {event_id} exists remotely without a local record");
        Error::internal("Failed to store event in the database", e)
    })?;

    Ok(Json(created.into()))
}

pub fn get_calendar_path(app: &AppState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(google_login))
        .routes(routes!(google_redirect))
        .routes(routes!(create_event))
        .with_state(app.clone())
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Calendar Service",
        description = "Google OAuth2 login and calendar event creation",
    ),
    components(schemas(CreateEventForm, CalendarEvent))
)]
pub struct ApiDoc;
