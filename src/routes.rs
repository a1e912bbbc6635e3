use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing,
};
use rearch::Container;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    access_logger::{AccessLogger, access_logger_capsule},
    api::{self, ShortenPayload},
    clock::{Clock, clock_capsule},
    link_registry::{
        AnalyticsError, CreateLinkError, LinkRegistry, ResolveLinkError, link_registry_capsule,
    },
};

type ErrorResponse = (StatusCode, Json<api::Error>);

#[derive(Clone)]
pub struct AppState {
    pub link_registry: Arc<dyn LinkRegistry>,
    pub access_logger: Arc<dyn AccessLogger>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    #[must_use]
    pub fn from_container(container: &Container) -> Self {
        let (link_registry, access_logger, clock) = container.read((
            link_registry_capsule,
            access_logger_capsule,
            clock_capsule,
        ));
        Self {
            link_registry,
            access_logger,
            clock,
        }
    }
}

/// Serve with `into_make_service_with_connect_info::<SocketAddr>()`; redirects
/// record the peer address.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/shorten", routing::post(shorten))
        .route("/analytics/{short_token}", routing::get(analytics))
        .route("/{short_token}", routing::get(redirect))
        .with_state(state)
}

#[instrument(skip(state))]
async fn shorten(
    State(state): State<AppState>,
    Json(ShortenPayload {
        original_url,
        expiry_hours,
    }): Json<ShortenPayload>,
) -> Result<(StatusCode, Json<api::ShortenedUrl>), ErrorResponse> {
    let created = state
        .link_registry
        .create(original_url.as_deref().unwrap_or_default(), expiry_hours)
        .await
        .map_err(|error: CreateLinkError| {
            let err_uuid = Uuid::new_v4();
            match error {
                CreateLinkError::MissingUrl | CreateLinkError::InvalidExpiryHours(_) => {
                    info!(?err_uuid, ?error, "User submitted a bad request");
                    error_response(StatusCode::BAD_REQUEST, error.to_string(), err_uuid)
                }
                CreateLinkError::Internal(_) => internal_error_response(&error, err_uuid),
            }
        })?;

    let shortened_url = api::ShortenedUrl::try_from(created)
        .map_err(|error| internal_error_response(&error, Uuid::new_v4()))?;
    Ok((StatusCode::CREATED, Json(shortened_url)))
}

#[instrument(skip(state))]
async fn redirect(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(short_token): Path<String>,
) -> Response {
    let link = match state.link_registry.resolve(&short_token).await {
        Ok(link) => link,
        Err(error) => {
            let err_uuid = Uuid::new_v4();
            let status = match error {
                ResolveLinkError::NotFound => StatusCode::NOT_FOUND,
                ResolveLinkError::Expired { .. } => StatusCode::GONE,
                ResolveLinkError::Internal(_) => {
                    return internal_error_response(&error, err_uuid).into_response();
                }
            };
            info!(?err_uuid, ?error, "Short URL cannot be followed");
            return error_response(status, error.to_string(), err_uuid).into_response();
        }
    };

    // NOTE: a lost access log entry does not cost the visitor their redirect
    if let Err(error) = state
        .access_logger
        .record(
            link.short_token.as_str(),
            state.clock.now(),
            &peer.ip().to_string(),
        )
        .await
    {
        let err_uuid = Uuid::new_v4();
        error!(?err_uuid, ?error, "Failed to record access; redirecting anyway");
    }

    (StatusCode::FOUND, [(header::LOCATION, link.original_url)]).into_response()
}

#[instrument(skip(state))]
async fn analytics(
    State(state): State<AppState>,
    Path(short_token): Path<String>,
) -> Result<Json<api::Analytics>, ErrorResponse> {
    let link_analytics = state
        .link_registry
        .get_analytics(&short_token)
        .await
        .map_err(|error: AnalyticsError| {
            let err_uuid = Uuid::new_v4();
            match error {
                AnalyticsError::NotFound => {
                    info!(?err_uuid, ?error, "Analytics requested for unknown short URL");
                    error_response(StatusCode::NOT_FOUND, error.to_string(), err_uuid)
                }
                AnalyticsError::Internal(_) => internal_error_response(&error, err_uuid),
            }
        })?;

    api::Analytics::try_from(link_analytics)
        .map(Json)
        .map_err(|error| internal_error_response(&error, Uuid::new_v4()))
}

fn error_response(status: StatusCode, error: String, err_uuid: Uuid) -> ErrorResponse {
    (
        status,
        Json(api::Error {
            error,
            error_id: err_uuid.to_string(),
        }),
    )
}

fn internal_error_response(error: &dyn std::fmt::Debug, err_uuid: Uuid) -> ErrorResponse {
    error!(?err_uuid, ?error, "Encountered an error during a request");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_owned(),
        err_uuid,
    )
}
