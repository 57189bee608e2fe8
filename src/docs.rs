use std::sync::Arc;

use axum::{routing::get, Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::{Server, ServerBuilder};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::{audit, authz, models, routes};

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::register,
        routes::auth::login,
        routes::auth::me,
        routes::auth::logout,
        routes::auth::permissions,
        routes::pets::list_pets,
        routes::pets::get_pet,
        routes::pets::create_pet,
        routes::pets::update_pet,
        routes::pets::delete_pet,
        routes::pets::block_pet,
        routes::pets::unblock_pet,
        routes::users::list_users,
        routes::users::get_user,
        routes::users::create_user,
        routes::users::update_user,
        routes::users::delete_user,
        routes::users::block_user,
        routes::users::unblock_user,
        routes::matches::list_matches,
        routes::matches::get_match,
        routes::matches::create_match,
        routes::matches::update_match,
        routes::matches::delete_match,
        routes::audit_logs::list_audit_logs,
        routes::audit_logs::create_audit_log,
        routes::audit_logs::verify_audit_chain
    ),
    components(
        schemas(
            authz::Role,
            authz::Resource,
            authz::Action,
            models::user::User,
            models::user::UserStatus,
            models::user::AuthResponse,
            models::user::LoginRequest,
            models::user::RegisterRequest,
            models::user::UserCreateRequest,
            models::user::UserUpdateRequest,
            models::user::PermissionSet,
            models::user::EffectivePermissions,
            models::pet::Pet,
            models::pet::PetStatus,
            models::pet::Coordinates,
            models::pet::PetCreateRequest,
            models::pet::PetUpdateRequest,
            models::pet::UnblockPetRequest,
            models::pet::PetListResponse,
            models::pet_match::PetMatch,
            models::pet_match::MatchStatus,
            models::pet_match::MatchCreateRequest,
            models::pet_match::MatchUpdateRequest,
            models::audit_log::AuditLogEntry,
            models::audit_log::AuditLogCreateRequest,
            audit::AuditRecord,
            audit::AuditOutcome,
            audit::ChainReport,
            routes::auth::MessageResponse,
            routes::health::HealthResponse
        )
    ),
    modifiers(&BearerAuth),
    security(("bearerAuth" = [])),
    tags(
        (name = "Health", description = "Liveness and database probe"),
        (name = "Auth", description = "Registration, login and the caller's permissions"),
        (name = "Pets", description = "Lost and found reports"),
        (name = "Users", description = "Account administration"),
        (name = "Matches", description = "Lost/found pairings"),
        (name = "Audit", description = "Append-only audit trail")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

fn tls_enabled() -> bool {
    std::env::var("TLS_CERT_PATH").is_ok() && std::env::var("TLS_KEY_PATH").is_ok()
}

fn local_server(port: u16) -> Server {
    let scheme = if tls_enabled() { "https" } else { "http" };
    ServerBuilder::new()
        .url(format!("{}://localhost:{}", scheme, port))
        .build()
}

/// The API description with a `servers` entry pointing at the local backend.
pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
    let mut doc = ApiDoc::openapi();
    doc.servers = Some(vec![local_server(port)]);
    Ok(doc)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
    let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
        .try_it_out_enabled(true)
        .with_credentials(true)
        .persist_authorization(true);

    let doc_json = Arc::new(serde_json::to_value(&doc)?);

    let json_route = get(move || {
        let doc_json = Arc::clone(&doc_json);
        async move { Json((*doc_json).clone()) }
    });

    Ok(Router::new()
        .route("/api-docs/openapi.json", json_route)
        .merge(SwaggerUi::new("/docs").config(swagger_config)))
}
