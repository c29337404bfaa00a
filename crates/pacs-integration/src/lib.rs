//! # PACS集成模块
//!
//! 入库核心的对外接口：
//! - 采集通知HTTP接收端，把投递转交给入库流程
//! - Webhook事件通知，实现检查新内容的实时推送

pub mod api;
pub mod webhook;

pub use api::{create_api_routes, status_for, ApiServer, ApiState};
pub use webhook::{
    WebhookEvent, WebhookEventType, WebhookManager, WebhookSubscription, WebhookSubscriptionRequest,
};
