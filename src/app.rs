use std::sync::Arc;

use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::audit::{init_sink, AuditSink, AuditSinkKind};
use crate::authz::AccessControl;
use crate::errors::AppError;
use crate::jwt::JwtConfig;
use crate::routes::{audit_logs, auth, health, matches, pets, users};

const CORS_MAX_AGE_SECS: u64 = 86_400;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub access: Arc<AccessControl>,
    pub audit: Arc<dyn AuditSink>,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            access: Arc::new(AccessControl::standard()),
            audit,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let sink_kind = AuditSinkKind::from_env();
    tracing::info!(sink = ?sink_kind, "audit sink configured");

    let audit = init_sink(sink_kind, &pool);
    Ok(router(AppState::new(pool, jwt_config, audit)))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(CORS_MAX_AGE_SECS));

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout))
        .route("/permissions", get(auth::permissions));

    let pet_routes = Router::new()
        .route("/", get(pets::list_pets).post(pets::create_pet))
        .route("/:id", get(pets::get_pet).put(pets::update_pet).delete(pets::delete_pet))
        .route("/:id/block", post(pets::block_pet))
        .route("/:id/unblock", post(pets::unblock_pet));

    let user_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route("/:id", get(users::get_user).put(users::update_user).delete(users::delete_user))
        .route("/:id/block", post(users::block_user))
        .route("/:id/unblock", post(users::unblock_user));

    let match_routes = Router::new()
        .route("/", get(matches::list_matches).post(matches::create_match))
        .route(
            "/:id",
            get(matches::get_match).put(matches::update_match).delete(matches::delete_match),
        );

    let audit_routes = Router::new()
        .route("/", get(audit_logs::list_audit_logs).post(audit_logs::create_audit_log))
        .route("/verify", get(audit_logs::verify_audit_chain));

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/pets", pet_routes)
        .nest("/users", user_routes)
        .nest("/matches", match_routes)
        .nest("/audit-logs", audit_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
