//! Webhook事件通知模块
//!
//! 实现入库核心的通知协作者，支持：
//! - 事件订阅管理
//! - Webhook签名
//! - 投递与入库调用解耦，失败只记录日志

use anyhow::Result;
use async_trait::async_trait;
use pacs_core::StudyContentNotifier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Webhook事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEventType {
    StudyCreated,
    StudyContentAdded,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StudyCreated => "study.created",
            Self::StudyContentAdded => "study.content_added",
        }
    }
}

impl TryFrom<&str> for WebhookEventType {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "study.created" => Ok(Self::StudyCreated),
            "study.content_added" => Ok(Self::StudyContentAdded),
            _ => Err(anyhow::anyhow!("Unknown event type: {}", value)),
        }
    }
}

/// Webhook事件数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: WebhookEventType,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub data: serde_json::Value,
    pub source: String,
}

impl WebhookEvent {
    pub fn new(event_type: WebhookEventType, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: chrono::Utc::now(),
            data,
            source: "pacs".to_string(),
        }
    }

    /// 检查内容新增事件
    pub fn study_content_added(study_id: Uuid, is_new_study: bool) -> Self {
        Self::new(
            WebhookEventType::StudyContentAdded,
            serde_json::json!({ "study_id": study_id, "is_new_study": is_new_study }),
        )
    }
}

/// Webhook订阅配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: String,
    pub url: String,
    pub events: Vec<WebhookEventType>,
    pub secret: Option<String>,
    pub active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl WebhookSubscription {
    pub fn new(url: String, events: Vec<WebhookEventType>, secret: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url,
            events,
            secret,
            active: true,
            created_at: chrono::Utc::now(),
        }
    }

    /// 检查是否对指定事件感兴趣
    pub fn is_interested_in(&self, event_type: &WebhookEventType) -> bool {
        self.active && self.events.contains(event_type)
    }

    /// 生成签名
    pub fn generate_signature(&self, payload: &str) -> Option<String> {
        use sha2::{Digest, Sha256};

        self.secret.as_ref().map(|secret| {
            let mut hasher = Sha256::new();
            hasher.update(payload);
            hasher.update(secret);
            format!("sha256={:x}", hasher.finalize())
        })
    }
}

/// Webhook订阅请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscriptionRequest {
    pub url: String,
    pub events: Vec<String>,
    pub secret: Option<String>,
    pub active: Option<bool>,
}

/// Webhook管理器
pub struct WebhookManager {
    subscriptions: RwLock<HashMap<String, WebhookSubscription>>,
    client: reqwest::Client,
}

impl WebhookManager {
    /// 创建新的Webhook管理器
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            client: reqwest::Client::new(),
        }
    }

    /// 使用指定投递超时创建
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            subscriptions: RwLock::new(HashMap::new()),
            client,
        })
    }

    /// 订阅Webhook事件
    pub async fn subscribe(&self, request: WebhookSubscriptionRequest) -> Result<String> {
        let mut events = Vec::new();
        for event_str in &request.events {
            match WebhookEventType::try_from(event_str.as_str()) {
                Ok(event_type) => events.push(event_type),
                Err(e) => warn!("Invalid event type '{}': {}", event_str, e),
            }
        }

        if events.is_empty() {
            return Err(anyhow::anyhow!("No valid event types specified"));
        }

        let mut subscription = WebhookSubscription::new(request.url, events, request.secret);
        subscription.active = request.active.unwrap_or(true);

        let subscription_id = subscription.id.clone();
        self.subscriptions
            .write()
            .await
            .insert(subscription_id.clone(), subscription);

        info!("Created webhook subscription: {}", subscription_id);
        Ok(subscription_id)
    }

    /// 取消订阅
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.remove(subscription_id).is_some() {
            info!("Removed webhook subscription: {}", subscription_id);
            Ok(())
        } else {
            Err(anyhow::anyhow!("Subscription not found: {}", subscription_id))
        }
    }

    /// 列出所有订阅
    pub async fn list_subscriptions(&self) -> Vec<WebhookSubscription> {
        self.subscriptions.read().await.values().cloned().collect()
    }

    /// 发送事件到所有感兴趣的订阅者
    ///
    /// 每个订阅者在独立任务中投递，不等待结果。返回派发的订阅者数量。
    pub async fn emit_event(&self, event: WebhookEvent) -> Result<usize> {
        debug!("Emitting event: {}", event.event_type.as_str());

        let interested: Vec<WebhookSubscription> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|sub| sub.is_interested_in(&event.event_type))
            .cloned()
            .collect();

        if interested.is_empty() {
            debug!("No subscriptions interested in event: {}", event.event_type.as_str());
            return Ok(0);
        }

        let payload = serde_json::to_string(&event)?;
        let event_name = event.event_type.as_str();

        for subscription in &interested {
            let subscription = subscription.clone();
            let payload = payload.clone();
            let client = self.client.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::send_webhook(&client, &subscription, event_name, &payload).await {
                    error!("Webhook delivery to {} failed: {}", subscription.url, e);
                }
            });
        }

        Ok(interested.len())
    }

    /// 发送单个Webhook
    async fn send_webhook(
        client: &reqwest::Client,
        subscription: &WebhookSubscription,
        event_name: &str,
        payload: &str,
    ) -> Result<()> {
        let mut request = client
            .post(&subscription.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "PACS-Webhook/1.0")
            .header("X-PACS-Event", event_name)
            .body(payload.to_string());

        if let Some(signature) = subscription.generate_signature(payload) {
            request = request.header("X-PACS-Signature", signature);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send webhook: {}", e))?;

        if response.status().is_success() {
            info!("Successfully sent webhook to: {}", subscription.url);
            Ok(())
        } else {
            Err(anyhow::anyhow!("Webhook failed with status: {}", response.status()))
        }
    }
}

impl Default for WebhookManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StudyContentNotifier for WebhookManager {
    async fn on_study_content_added(&self, study_id: Uuid, is_new_study: bool) {
        let mut events = vec![WebhookEvent::study_content_added(study_id, is_new_study)];
        if is_new_study {
            events.push(WebhookEvent::new(
                WebhookEventType::StudyCreated,
                serde_json::json!({ "study_id": study_id }),
            ));
        }

        for event in events {
            if let Err(e) = self.emit_event(event).await {
                error!("Failed to emit study event for {}: {}", study_id, e);
            }
        }
    }
}
