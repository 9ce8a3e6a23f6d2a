use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Identity: confirmation codes, registration, token exchange, request identity.
pub mod accounts;
pub mod auth;
pub mod codes;
pub mod permissions;

// Domain data, persistence and the rating rule.
pub mod models;
pub mod rating;
pub mod repository;
pub mod validation;

// Infrastructure.
pub mod config;
pub mod error;
pub mod handlers;
pub mod mailer;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::AppError;
pub use mailer::{HttpMailer, LogMailer, MailerState, MockMailer};
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};

/// ClockState
///
/// The time source shared by the services. Production uses `mockable::DefaultClock`;
/// tests inject a controllable clock to exercise expiry.
pub type ClockState = Arc<dyn mockable::Clock + Send + Sync>;

/// ApiDoc
///
/// Aggregates every `#[utoipa::path]` handler and request/response schema into the
/// OpenAPI document served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::signup, handlers::auth::obtain_token,
        handlers::users::get_me, handlers::users::update_me, handlers::users::list_users,
        handlers::users::create_user, handlers::users::get_user, handlers::users::update_user,
        handlers::users::delete_user,
        handlers::catalog::list_categories, handlers::catalog::create_category,
        handlers::catalog::delete_category, handlers::catalog::list_genres,
        handlers::catalog::create_genre, handlers::catalog::delete_genre,
        handlers::catalog::list_titles, handlers::catalog::get_title,
        handlers::catalog::create_title, handlers::catalog::update_title,
        handlers::catalog::delete_title,
        handlers::reviews::list_reviews, handlers::reviews::get_review,
        handlers::reviews::create_review, handlers::reviews::update_review,
        handlers::reviews::delete_review, handlers::reviews::list_comments,
        handlers::reviews::get_comment, handlers::reviews::create_comment,
        handlers::reviews::update_comment, handlers::reviews::delete_comment
    ),
    components(
        schemas(
            models::Role, models::UserProfile, models::CreateUserRequest,
            models::UpdateUserRequest, models::SignupRequest, models::TokenRequest,
            models::TokenResponse, models::Category, models::Genre, models::SlugEntryRequest,
            models::Title, models::CreateTitleRequest, models::UpdateTitleRequest,
            models::Review, models::CreateReviewRequest, models::UpdateReviewRequest,
            models::Comment, models::CommentRequest,
        )
    ),
    tags(
        (name = "yamdb", description = "Reviews and ratings of works API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single container of services shared by every request.
#[derive(Clone)]
pub struct AppState {
    /// Persistence, including the confirmation code store.
    pub repo: RepositoryState,
    /// Out-of-band delivery of confirmation codes.
    pub mailer: MailerState,
    pub clock: ClockState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for MailerState {
    fn from_ref(app_state: &AppState) -> MailerState {
        app_state.mailer.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Gate for the authenticated and admin routers: extracting `AuthUser` validates the
/// bearer token and reloads the user, so a missing, forged, expired or orphaned token
/// is answered with 401 before any handler runs.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the API under `/api/v1`, the health check, Swagger UI and the tower layers.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. API Assembly: public reads and writes guarded by the auth layer share paths.
    let api = Router::new()
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .merge(
            admin::admin_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        );

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(|| async { "ok" }))
        .nest("/api/v1", api)
        .with_state(state);

    // 3. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS Layer
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the per-request span so every log line of a request carries its `x-request-id`.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
