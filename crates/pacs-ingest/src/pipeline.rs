//! 入库流程
//!
//! 规范化 → 身份解析 → 计数重算 → 占位报告 → 结果汇报，严格按此顺序同步执行。
//! 每条通知是独立的工作单元，进程内不保留跨通知的状态。

use crate::aggregate::AggregateMaintainer;
use crate::config::IngestConfig;
use crate::outcome::{Outcome, OutcomeReporter, PayloadIdentifiers, PipelineState};
use crate::payload::{parse_payload, PayloadNormalizer};
use crate::report::ReportInitializer;
use crate::resolver::IdentityResolver;
use chrono::{DateTime, Utc};
use pacs_core::{EntityKind, MetadataStore, Result, StudyContentNotifier};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 采集通知入库器
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn MetadataStore>,
    notifier: Arc<dyn StudyContentNotifier>,
    config: Arc<IngestConfig>,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        notifier: Arc<dyn StudyContentNotifier>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// 处理一条原始通知
    ///
    /// 所有错误都包含在返回的 `Outcome` 中，不会向调用方抛出。
    pub async fn ingest(&self, payload: &[u8]) -> Outcome {
        match parse_payload(payload) {
            Ok(value) => self.ingest_value(value).await,
            Err(err) => {
                let outcome = OutcomeReporter::new(self.notifier.as_ref())
                    .report(PipelineState::default(), Err(err))
                    .await;
                log_outcome(&outcome);
                outcome
            }
        }
    }

    /// 处理一条已解码的通知
    pub async fn ingest_value(&self, raw: Value) -> Outcome {
        self.ingest_at(raw, Utc::now()).await
    }

    /// 以指定处理时间处理通知
    pub async fn ingest_at(&self, raw: Value, now: DateTime<Utc>) -> Outcome {
        let mut state = PipelineState {
            identifiers: PayloadIdentifiers::from_raw(&raw),
            ..PipelineState::default()
        };

        let result = self.run(&raw, now, &mut state).await;
        let outcome = OutcomeReporter::new(self.notifier.as_ref())
            .report(state, result)
            .await;

        log_outcome(&outcome);
        outcome
    }

    async fn run(&self, raw: &Value, now: DateTime<Utc>, state: &mut PipelineState) -> Result<()> {
        let store = self.store.as_ref();

        let normalization = PayloadNormalizer::new(&self.config).normalize(raw, now)?;
        let payload = normalization.payload;
        state.diagnostics.extend(normalization.diagnostics);
        state.identifiers = PayloadIdentifiers::from(&payload);
        debug!(
            "Normalized notification for study {} / series {} / sop {}",
            payload.study_instance_id, payload.series_instance_id, payload.sop_instance_id
        );

        IdentityResolver::new(store)
            .resolve(&payload, &mut state.hierarchy, &mut state.diagnostics)
            .await?;

        let study_id = state.hierarchy.attached_study()?;
        let series_id = state.hierarchy.require(EntityKind::Series)?;

        let counts = AggregateMaintainer::new(store).recompute(study_id, series_id).await?;
        state.image_count = Some(counts.study_images);

        let report = ReportInitializer::new(store, &self.config)
            .ensure_placeholder(study_id)
            .await?;
        state.report = Some(report);

        Ok(())
    }
}

/// 在入口处把结果和诊断事件输出到日志
fn log_outcome(outcome: &Outcome) {
    for diagnostic in &outcome.diagnostics {
        diagnostic.log();
    }

    match (&outcome.error, outcome.study) {
        (None, Some(study)) => info!(
            "Ingested notification: study {} (new={}), image new={}, image_count={:?}",
            study.id,
            study.created,
            outcome.is_new_image(),
            outcome.image_count
        ),
        (None, None) => warn!("Ingestion succeeded without a resolved study"),
        (Some(err), _) if err.retryable => error!(
            "Ingestion failed ({:?}, retryable): {} [{:?}]",
            err.kind, err.message, err.identifiers
        ),
        (Some(err), _) => warn!(
            "Ingestion rejected ({:?}): {} [{:?}]",
            err.kind, err.message, err.identifiers
        ),
    }
}
