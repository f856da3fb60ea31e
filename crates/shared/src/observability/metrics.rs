//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集。
//! 不启动 HTTP 端点，指标快照通过 [`render`] 获取。

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub const RULE_EVALUATIONS_TOTAL: &str = "feed_rule_evaluations_total";
pub const RULE_EVALUATION_DURATION_SECONDS: &str = "feed_rule_evaluation_duration_seconds";
pub const RULE_MUTATIONS_TOTAL: &str = "feed_rule_mutations_total";

/// 安装 Prometheus recorder
///
/// 重复调用时复用已安装的 handle。
pub fn init(service_name: &str) -> Result<()> {
    if PROMETHEUS_HANDLE.get().is_none() {
        let handle = PrometheusBuilder::new().install_recorder()?;
        let _ = PROMETHEUS_HANDLE.set(handle);
    }

    register_common_metrics(service_name);
    Ok(())
}

/// 注册规则引擎指标描述，出现在导出文本的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        RULE_EVALUATIONS_TOTAL,
        "Total number of feed rule evaluations"
    );
    metrics::describe_histogram!(
        RULE_EVALUATION_DURATION_SECONDS,
        "Feed rule evaluation duration in seconds"
    );
    metrics::describe_counter!(
        RULE_MUTATIONS_TOTAL,
        "Total number of feed rule mutations"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 获取全局 Prometheus handle
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// 渲染当前指标快照，recorder 未安装时返回 None
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次 feed 匹配
#[inline]
pub fn record_rule_evaluation(kind: &str, matched: bool, duration_secs: f64) {
    metrics::counter!(
        RULE_EVALUATIONS_TOTAL,
        "kind" => kind.to_string(),
        "matched" => matched.to_string()
    )
    .increment(1);

    metrics::histogram!(
        RULE_EVALUATION_DURATION_SECONDS,
        "kind" => kind.to_string()
    )
    .record(duration_secs);
}

/// 记录一次规则变更
#[inline]
pub fn record_rule_mutation(kind: &str, operation: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    metrics::counter!(
        RULE_MUTATIONS_TOTAL,
        "kind" => kind.to_string(),
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
}
