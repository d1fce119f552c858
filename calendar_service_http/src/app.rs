use axum::{
    Router,
    http::{Method, StatusCode},
};
use log::{debug, info};
use stack_string::format_sstr;
use std::{convert::TryInto, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::interval};
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use calendar_service_lib::{config::Config, pgpool::PgPool, store::CalendarStore};
use gcal_lib::oauth::GoogleOAuth;

use crate::{
    errors::ServiceError as Error,
    routes::{ApiDoc, USER_ID_HEADER, get_calendar_path},
    session::SessionStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn CalendarStore>,
    pub oauth: GoogleOAuth,
    pub sessions: SessionStore,
}

impl AppState {
    /// # Errors
    /// Returns error if the oauth client cannot be built from `config`
    pub fn new(config: Config, store: Arc<dyn CalendarStore>) -> Result<Self, Error> {
        let oauth = config.google_oauth()?;
        let ttl = Duration::from_secs(config.session_ttl_seconds)
            .try_into()
            .map_err(anyhow::Error::from)?;
        Ok(Self {
            config,
            store,
            oauth,
            sessions: SessionStore::new(ttl),
        })
    }
}

/// # Errors
/// Returns error if `init_config`, the database pool or migrations fail
pub async fn start_app() -> Result<(), Error> {
    let config = Config::init_config()?;
    let pool = PgPool::new(&config.database_url())?;
    debug!("{pool:?}");
    pool.run_migrations().await?;
    let app = AppState::new(config, Arc::new(pool))?;
    run_app(app).await
}

/// Router with the calendar routes, openapi documents and cors.
///
/// # Errors
/// Returns error if the openapi document cannot be serialized
pub fn build_router(app: &AppState) -> Result<Router, Error> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(["content-type".try_into()?, USER_ID_HEADER.try_into()?])
        .allow_origin(Any);

    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .merge(get_calendar_path(app))
        .split_for_parts();

    let spec_json = serde_json::to_string_pretty(&api)?;
    let spec_yaml = serde_yml::to_string(&api)?;

    let router = router
        .route(
            "/openapi/json",
            axum::routing::get(|| async move {
                (
                    StatusCode::OK,
                    [("content-type", "application/json")],
                    spec_json,
                )
            }),
        )
        .route(
            "/openapi/yaml",
            axum::routing::get(|| async move {
                (StatusCode::OK, [("content-type", "text/yaml")], spec_yaml)
            }),
        )
        .layer(cors);
    Ok(router)
}

async fn run_app(app: AppState) -> Result<(), Error> {
    async fn clean_sessions(sessions: SessionStore) {
        let mut i = interval(Duration::from_secs(60));
        loop {
            i.tick().await;
            sessions.remove_expired().await;
        }
    }
    tokio::task::spawn(clean_sessions(app.sessions.clone()));

    let router = build_router(&app)?;

    let host = &app.config.host;
    let port = app.config.port;

    let addr: SocketAddr = format_sstr!("{host}:{port}").parse()?;
    info!("listening on {addr:?}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router.into_make_service())
        .await
        .map_err(Into::into)
}
