//! 通知接收接口
//!
//! 把采集通知的HTTP投递转交给入库核心，并把结果映射为响应状态码

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use pacs_core::ErrorKind;
use pacs_ingest::{Ingestor, Outcome};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::webhook::{WebhookManager, WebhookSubscription, WebhookSubscriptionRequest};

/// API状态
#[derive(Clone)]
pub struct ApiState {
    pub ingestor: Ingestor,
    pub webhook_manager: Arc<WebhookManager>,
}

impl ApiState {
    pub fn new(ingestor: Ingestor, webhook_manager: Arc<WebhookManager>) -> Self {
        Self {
            ingestor,
            webhook_manager,
        }
    }
}

/// 入库结果对应的HTTP状态码
///
/// 校验失败不可重试；依赖缺失和存储不可用提示投递方稍后重试。
pub fn status_for(outcome: &Outcome) -> StatusCode {
    match outcome.error_kind() {
        None => StatusCode::OK,
        Some(ErrorKind::Validation) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(ErrorKind::Dependency) => StatusCode::CONFLICT,
        Some(ErrorKind::Persistence) => StatusCode::SERVICE_UNAVAILABLE,
        Some(ErrorKind::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// API处理器
pub struct ApiHandler;

impl ApiHandler {
    /// 接收一条采集通知
    pub async fn receive_notification(
        State(state): State<ApiState>,
        body: Bytes,
    ) -> (StatusCode, Json<Outcome>) {
        debug!("Received notification ({} bytes)", body.len());

        let outcome = state.ingestor.ingest(&body).await;
        (status_for(&outcome), Json(outcome))
    }

    /// 健康检查
    pub async fn health_check() -> Json<HashMap<String, String>> {
        let mut status = HashMap::new();
        status.insert("status".to_string(), "healthy".to_string());
        status.insert("timestamp".to_string(), chrono::Utc::now().to_rfc3339());
        status.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
        Json(status)
    }

    /// 创建Webhook订阅
    pub async fn create_webhook(
        State(state): State<ApiState>,
        Json(request): Json<WebhookSubscriptionRequest>,
    ) -> Result<(StatusCode, Json<HashMap<String, String>>), StatusCode> {
        info!("Creating webhook subscription for URL: {}", request.url);

        match state.webhook_manager.subscribe(request).await {
            Ok(subscription_id) => {
                let mut response = HashMap::new();
                response.insert("subscription_id".to_string(), subscription_id);
                Ok((StatusCode::CREATED, Json(response)))
            }
            Err(e) => {
                warn!("Rejected webhook subscription: {}", e);
                Err(StatusCode::BAD_REQUEST)
            }
        }
    }

    /// 列出Webhook订阅
    pub async fn list_webhooks(State(state): State<ApiState>) -> Json<Vec<WebhookSubscription>> {
        Json(state.webhook_manager.list_subscriptions().await)
    }
}

async fn log_requests(req: Request, next: Next) -> Response {
    info!("API request: {} {}", req.method(), req.uri());
    let response = next.run(req).await;
    info!("API response: {}", response.status());
    response
}

/// 创建API路由
pub fn create_api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(ApiHandler::health_check))
        .route("/api/v1/notifications", post(ApiHandler::receive_notification))
        .route(
            "/api/v1/webhooks",
            post(ApiHandler::create_webhook).get(ApiHandler::list_webhooks),
        )
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
}

/// API服务器
pub struct ApiServer {
    app: Router,
}

impl ApiServer {
    pub fn new(state: ApiState) -> Self {
        let app = create_api_routes(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive());
        Self { app }
    }

    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        info!("Starting API server on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method};
    use pacs_core::EntityKind;
    use pacs_database::MemoryStore;
    use pacs_ingest::IngestConfig;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(store: Arc<MemoryStore>) -> Router {
        let webhooks = Arc::new(WebhookManager::new());
        let ingestor = Ingestor::new(store, webhooks.clone(), IngestConfig::default());
        create_api_routes(ApiState::new(ingestor, webhooks))
    }

    async fn post_json(app: Router, uri: &str, body: String) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_notification_is_ingested() {
        let store = Arc::new(MemoryStore::new());
        let payload = json!({
            "patientId": "MRN-1",
            "patientName": "Doe^Jane",
            "studyInstanceId": "1.2.3",
            "seriesInstanceId": "1.2.3.1",
            "sopInstanceId": "1.2.3.1.1",
            "modality": "CT"
        });

        let (status, body) =
            post_json(app(store.clone()), "/api/v1/notifications", payload.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["study"]["created"], true);
        assert_eq!(body["imageCount"], 1);
        assert_eq!(store.count(EntityKind::Image).await, 1);
        assert_eq!(store.count(EntityKind::Report).await, 1);
    }

    #[tokio::test]
    async fn test_malformed_notification_is_unprocessable() {
        let store = Arc::new(MemoryStore::new());
        let (status, body) =
            post_json(app(store.clone()), "/api/v1/notifications", "{not json".to_string()).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["kind"], "ValidationError");
        assert_eq!(store.count(EntityKind::Study).await, 0);
    }

    #[tokio::test]
    async fn test_store_outage_is_service_unavailable() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true).await;

        let (status, body) = post_json(
            app(store),
            "/api/v1/notifications",
            json!({ "patientId": "MRN-2", "studyInstanceId": "9.9" }).to_string(),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["retryable"], true);
    }

    #[tokio::test]
    async fn test_webhook_subscription_routes() {
        let store = Arc::new(MemoryStore::new());
        let app = app(store);

        let (status, body) = post_json(
            app.clone(),
            "/api/v1/webhooks",
            json!({ "url": "http://127.0.0.1:9/hook", "events": ["study.content_added"] }).to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["subscription_id"].is_string());

        let (status, _) = post_json(
            app,
            "/api/v1/webhooks",
            json!({ "url": "http://127.0.0.1:9/hook", "events": ["unknown"] }).to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = app(Arc::new(MemoryStore::new()))
            .oneshot(axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_status_mapping() {
        use pacs_core::PacsError;
        use pacs_ingest::outcome::failure;

        let mut outcome = Outcome {
            success: true,
            patient: None,
            study: None,
            series: None,
            image: None,
            report: None,
            attached_study: None,
            image_count: None,
            error: None,
            diagnostics: Vec::new(),
            notified: false,
        };
        assert_eq!(status_for(&outcome), StatusCode::OK);

        let cases = [
            (PacsError::Validation("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                PacsError::Dependency {
                    kind: EntityKind::Study,
                    message: "missing".into(),
                },
                StatusCode::CONFLICT,
            ),
            (PacsError::Persistence("down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (PacsError::Config("broken".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            outcome.success = false;
            outcome.error = Some(failure(err, Default::default()));
            assert_eq!(status_for(&outcome), expected);
        }
    }
}
