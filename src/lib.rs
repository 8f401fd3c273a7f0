pub mod auth;
pub mod backend;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod handlers;
pub mod hooks;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod recurrence;
pub mod seed;
pub mod services;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use backend::Backend;
use config::LOCATION_POLL_INTERVAL;
use models::Identity;
use services::{
    AttachmentStore, FixedLocation, GeolocationService, ListService, NotificationService,
    PermissionState, PreferencesService, TodoService,
};

#[derive(Clone)]
pub struct AppState {
    pub backend: Backend,
    pub attachments: AttachmentStore,
    pub base_path: Arc<String>,
    pub proximity_radius_m: f64,
}

impl AppState {
    pub fn lists(&self, user: Identity) -> ListService {
        ListService::new(self.backend.as_user(user))
    }

    pub fn todos(&self, user: Identity) -> TodoService {
        TodoService::new(self.backend.as_user(user), self.attachments.clone())
    }

    pub fn notifications(&self, user: Identity) -> NotificationService {
        NotificationService::new(self.backend.as_user(user))
    }

    pub fn preferences(&self, user: Identity) -> PreferencesService {
        PreferencesService::new(self.backend.as_user(user))
    }

    /// Proximity queries for a position reported by the client.
    pub fn geolocation(&self, user: Identity) -> GeolocationService {
        GeolocationService::new(
            self.backend.as_user(user),
            Arc::new(FixedLocation::new(None, PermissionState::Prompt)),
            self.proximity_radius_m,
            LOCATION_POLL_INTERVAL,
        )
    }
}

pub fn create_app(state: AppState) -> Router {
    let base_path = state.base_path.clone();

    let app_routes = Router::new()
        .route("/api/signup", post(handlers::auth::signup))
        .route("/api/login", post(handlers::auth::login))
        .route("/api/logout", post(handlers::auth::logout))
        .route("/api/tokens", get(handlers::auth::list_tokens))
        .route("/api/tokens", post(handlers::auth::create_token))
        .route("/api/tokens/{id}", delete(handlers::auth::revoke_token))
        .route("/api/lists", get(handlers::lists::list_lists))
        .route("/api/lists", post(handlers::lists::create_new_list))
        .route("/api/lists/{id}", get(handlers::lists::get_single_list))
        .route("/api/lists/{id}", put(handlers::lists::update_existing_list))
        .route("/api/lists/{id}", delete(handlers::lists::delete_existing_list))
        .route("/api/lists/{id}/shares", get(handlers::lists::list_shares))
        .route("/api/lists/{id}/shares", post(handlers::lists::share))
        .route("/api/shares/{id}", put(handlers::lists::update_share))
        .route("/api/shares/{id}", delete(handlers::lists::remove_share))
        .route("/api/shares/{id}/accept", post(handlers::lists::accept_share))
        .route("/api/lists/{id}/presence", get(handlers::lists::list_presence))
        .route("/api/lists/{id}/presence", put(handlers::lists::update_presence))
        .route("/api/lists/{id}/presence", delete(handlers::lists::leave))
        .route("/api/lists/{id}/todos", get(handlers::todos::list_todos))
        .route("/api/lists/{id}/todos", post(handlers::todos::create_new_todo))
        .route("/api/todos/bulk", post(handlers::todos::bulk))
        .route("/api/todos/{id}", get(handlers::todos::get_single_todo))
        .route("/api/todos/{id}", put(handlers::todos::update_existing_todo))
        .route("/api/todos/{id}", delete(handlers::todos::delete_existing_todo))
        .route("/api/todos/{id}/toggle", post(handlers::todos::toggle))
        .route("/api/todos/{id}/toggle-public", post(handlers::todos::toggle_public))
        .route(
            "/api/todos/{id}/complete-instance",
            post(handlers::todos::complete_instance),
        )
        .route("/api/todos/{id}/attachments", post(handlers::todos::upload_attachment))
        .route(
            "/api/todos/{id}/attachments/{attachment_id}",
            get(handlers::todos::download_attachment),
        )
        .route(
            "/api/todos/{id}/attachments/{attachment_id}",
            delete(handlers::todos::delete_attachment),
        )
        .route("/api/todos/{id}/shares", get(handlers::todos::list_shares))
        .route("/api/todos/{id}/shares", post(handlers::todos::share))
        .route("/api/todo-shares/{id}", put(handlers::todos::update_share))
        .route("/api/todo-shares/{id}", delete(handlers::todos::remove_share))
        .route("/api/nearby", get(handlers::todos::nearby))
        .route(
            "/api/notifications",
            get(handlers::notifications::list_notifications),
        )
        .route(
            "/api/notifications/read-all",
            post(handlers::notifications::read_all),
        )
        .route(
            "/api/notifications/{id}/read",
            post(handlers::notifications::read),
        )
        .route(
            "/api/notifications/{id}",
            delete(handlers::notifications::delete_existing_notification),
        )
        .route("/api/preferences", get(handlers::notifications::get_preferences))
        .route("/api/preferences", put(handlers::notifications::update_preferences))
        .layer(
            tower::ServiceBuilder::new()
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(tower_http::compression::CompressionLayer::new()),
        )
        .with_state(state);

    tracing::info!("base_path: {base_path:?}");

    if base_path.is_empty() {
        app_routes
    } else {
        Router::new().nest(&*base_path, app_routes)
    }
}
