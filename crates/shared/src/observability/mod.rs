//! 统一可观测性模块
//!
//! 提供 tracing 日志与 Prometheus 指标的统一初始化。
//! 引擎与 CLI 通过单一入口点配置可观测性，确保一致的指标命名。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;

use crate::config::ObservabilityConfig;

/// 可观测性资源守卫
///
/// 持有指标 recorder 的生命周期，drop 时输出关闭日志。
pub struct ObservabilityGuard {
    metrics_enabled: bool,
}

impl ObservabilityGuard {
    /// 创建一个空的 Guard（用于测试或禁用可观测性时）
    pub fn empty() -> Self {
        Self {
            metrics_enabled: false,
        }
    }

    /// 指标 recorder 是否已安装
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("Shutting down observability...");
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Tracing（日志）
/// 2. Metrics（Prometheus recorder，仅在配置启用时安装）
///
/// # Example
///
/// ```ignore
/// use feedrules_shared::config::AppConfig;
/// use feedrules_shared::observability;
///
/// fn main() -> anyhow::Result<()> {
///     let config = AppConfig::load("feed-rules")?;
///     let _guard = observability::init(&config.observability, &config.service_name)?;
///     Ok(())
/// }
/// ```
pub fn init(config: &ObservabilityConfig, service_name: &str) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    let metrics_enabled = if config.metrics_enabled {
        metrics::init(service_name)?;
        true
    } else {
        false
    };

    info!(
        service = %service_name,
        log_format = %config.log_format,
        metrics_enabled,
        "Observability initialized"
    );

    Ok(ObservabilityGuard { metrics_enabled })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_guard() {
        let guard = ObservabilityGuard::empty();
        assert!(!guard.metrics_enabled());
    }
}
