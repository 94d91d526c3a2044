//! Demo application handlers served behind the telemetry stage.

use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::telemetry::RequestContext;

#[derive(Debug, Deserialize)]
pub struct GreeterQuery {
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Greeting {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
}

pub async fn greeter(Query(query): Query<GreeterQuery>) -> Json<Greeting> {
    let name = query.name.unwrap_or_else(|| "rk-dev".to_string());
    Json(Greeting {
        message: format!("Hello {}!", name),
    })
}

pub async fn get_user(ctx: RequestContext, Path(id): Path<String>) -> Response {
    match id.parse::<u64>() {
        Ok(id) => {
            ctx.add_field("user_id", id as i64);
            Json(User {
                id,
                name: format!("user-{}", id),
            })
            .into_response()
        }
        Err(e) => {
            ctx.record_error(format!("invalid user id {:?}: {}", id, e));
            (StatusCode::BAD_REQUEST, "User id must be numeric").into_response()
        }
    }
}

pub async fn healthy() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "healthy": true }))
}

/// Dashboard endpoints are served elsewhere; this only answers the route.
pub async fn dashboard(Path(item): Path<String>) -> impl IntoResponse {
    (StatusCode::OK, format!("dashboard page {} is not bundled", item))
}

/// Routes of the demo application.
pub fn router() -> Router {
    Router::new()
        .route("/v1/greeter", get(greeter))
        .route("/users/{id}", get(get_user))
        .route("/rk/v1/healthy", get(healthy))
        .route("/rk/v1/tv/{*item}", get(dashboard))
}
