//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::Serialize;

use crate::service::{HealthSnapshot, HealthStatus, ReflectService};
use crate::version::VersionInfo;

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub version: VersionInfo,
    /// Live entries in the identity cache.
    pub handles: usize,
    /// Classes the loader can resolve.
    pub classes: usize,
}

impl From<HealthSnapshot> for HealthCheckResponse {
    fn from(snapshot: HealthSnapshot) -> Self {
        Self {
            status: snapshot.status,
            version: snapshot.version,
            handles: snapshot.handles,
            classes: snapshot.classes,
        }
    }
}

async fn health_check(State(service): State<Arc<ReflectService>>) -> Json<HealthCheckResponse> {
    Json(service.health().into())
}

async fn reflect(State(service): State<Arc<ReflectService>>, body: String) -> impl IntoResponse {
    let reply = service.execute(body).await;
    ([(header::CONTENT_TYPE, "text/xml")], reply)
}

async fn shutdown(State(service): State<Arc<ReflectService>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

pub fn routes(service: Arc<ReflectService>) -> Router {
    Router::new()
        .route("/", post(reflect))
        .route("/reflect", post(reflect))
        .route("/health-check", get(health_check))
        .route("/shutdown", post(shutdown))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, RemoteValue, ValueKind};
    use crate::server::{ClassBuilder, ClassLoader};
    use crate::wire::{SerializationContext, decode_response, encode_request};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn create_service() -> Arc<ReflectService> {
        let loader = Arc::new(ClassLoader::new());
        loader.register(ClassBuilder::new("Widget").field("size", 10.0).build());
        Arc::new(ReflectService::new(loader, Duration::from_secs(60)))
    }

    async fn response_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        serde_json::from_str(&response_text(response).await).unwrap()
    }

    async fn post_command(
        app: Router,
        path: &str,
        command: Command,
        args: &[RemoteValue],
    ) -> RemoteValue {
        let mut ctx = SerializationContext::new();
        let args: Vec<_> = args.iter().map(RemoteValue::to_datum).collect();
        let body = encode_request(&mut ctx, &command.to_datum(), &args);
        let response = app
            .oneshot(
                Request::post(path)
                    .header("content-type", "text/xml")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/xml");
        let reply = response_text(response).await;
        let rtrn = decode_response(&mut ctx, &reply).unwrap().unwrap();
        RemoteValue::from_datum(&rtrn).unwrap()
    }

    #[tokio::test]
    async fn health_check_reports_status_version_and_counts() {
        let service = create_service();
        let app = routes(service.clone());

        let response = app
            .oneshot(Request::get("/health-check").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["status"], "READY");
        assert!(json["version"]["remote_reflect"].is_string());
        assert_eq!(json["version"]["protocol"], 1);
        assert_eq!(json["handles"], 0);
        assert_eq!(json["classes"], service.health().classes);
        assert!(service.executor().loader().contains("Widget"));
    }

    #[tokio::test]
    async fn reflect_runs_commands_on_both_paths() {
        let service = create_service();

        let class = post_command(
            routes(service.clone()),
            "/reflect",
            Command::ForName,
            &[RemoteValue::string("Widget")],
        )
        .await;
        assert_eq!(class, RemoteValue::class("Widget"));

        let obj = post_command(routes(service.clone()), "/", Command::NewInstance, &[class]).await;
        assert_eq!(obj, RemoteValue::new(ValueKind::Object, "1"));
        assert_eq!(service.health().handles, 1);
    }

    #[tokio::test]
    async fn garbage_body_answers_null() {
        let app = routes(create_service());
        let response = app
            .oneshot(Request::post("/reflect").body(Body::from("not xml")).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let reply = response_text(response).await;
        let mut ctx = SerializationContext::new();
        let rtrn = decode_response(&mut ctx, &reply).unwrap().unwrap();
        assert!(RemoteValue::from_datum(&rtrn).unwrap().is_null());
    }

    #[tokio::test]
    async fn get_on_reflect_is_not_allowed() {
        let app = routes(create_service());
        let response = app
            .oneshot(Request::get("/reflect").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn shutdown_triggers_service_shutdown() {
        let service = create_service();
        let mut rx = service.shutdown_rx();
        let app = routes(service.clone());

        assert!(!*rx.borrow());

        let response = app
            .oneshot(Request::post("/shutdown").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert_eq!(service.health().status, HealthStatus::ShuttingDown);
    }
}
