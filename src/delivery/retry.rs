//! 失败分类与退避策略

use std::time::Duration;

use super::sender::DeliveryError;
use crate::config::WebhookConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 可重试：超时、连接失败、5xx、408、429
    Transient,
    /// 不重试：其他 4xx、DNS 失败、URL 非法
    Permanent,
}

pub fn classify(err: &DeliveryError) -> FailureKind {
    match err {
        DeliveryError::Timeout | DeliveryError::Connect(_) => FailureKind::Transient,
        DeliveryError::Status(code) if *code >= 500 || *code == 408 || *code == 429 => {
            FailureKind::Transient
        }
        DeliveryError::Status(_) => FailureKind::Permanent,
        DeliveryError::Dns(_) | DeliveryError::InvalidUrl(_) => FailureKind::Permanent,
        // 无法归类的传输层错误按可重试处理
        DeliveryError::Request(_) => FailureKind::Transient,
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub base: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: Duration::from_millis(config.backoff_base_ms),
            max_backoff: Duration::from_secs(config.backoff_max_secs),
        }
    }

    /// 第 attempt 次失败后的等待时间：base * 2^(attempt-1)，不超过上限
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub fn should_retry(&self, err: &DeliveryError, attempt: u32) -> bool {
        classify(err) == FailureKind::Transient && attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base: Duration::from_millis(500),
            max_backoff: Duration::from_secs(3),
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(&DeliveryError::Timeout), FailureKind::Transient);
        assert_eq!(classify(&DeliveryError::Connect("refused".into())), FailureKind::Transient);
        assert_eq!(classify(&DeliveryError::Status(503)), FailureKind::Transient);
        assert_eq!(classify(&DeliveryError::Status(408)), FailureKind::Transient);
        assert_eq!(classify(&DeliveryError::Status(429)), FailureKind::Transient);
        assert_eq!(classify(&DeliveryError::Status(404)), FailureKind::Permanent);
        assert_eq!(classify(&DeliveryError::Status(410)), FailureKind::Permanent);
        assert_eq!(classify(&DeliveryError::Dns("no host".into())), FailureKind::Permanent);
        assert_eq!(classify(&DeliveryError::InvalidUrl("x".into())), FailureKind::Permanent);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_secs(3));
        assert_eq!(policy.backoff(40), Duration::from_secs(3));
    }

    #[test]
    fn test_should_retry_stops_at_max_attempts() {
        let policy = policy();
        assert!(policy.should_retry(&DeliveryError::Status(502), 4));
        assert!(!policy.should_retry(&DeliveryError::Status(502), 5));
        assert!(!policy.should_retry(&DeliveryError::Status(400), 1));
    }
}
