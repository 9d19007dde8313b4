//! 随机凭证生成：租户入站 API key、webhook 签名密钥、会话令牌

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Credential generator
pub struct ApiKeyGenerator;

impl ApiKeyGenerator {
    fn random(len: usize) -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    /// 租户入站 API key
    /// Format: tc_ak_<32-char-random>
    pub fn generate() -> String {
        format!("tc_ak_{}", Self::random(32))
    }

    /// Webhook 签名密钥，只在服务端生成
    /// Format: whsec_<32-char-random>
    pub fn webhook_secret() -> String {
        format!("whsec_{}", Self::random(32))
    }

    /// 不透明会话令牌
    pub fn session_token() -> String {
        Self::random(48)
    }

    /// 短随机后缀（slug 冲突时使用）
    pub fn short_suffix() -> String {
        Self::random(6).to_lowercase()
    }

    /// 日志中用于区分 key 的指纹，不可逆
    pub fn fingerprint(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..12].to_string()
    }

    /// 常量时间比较
    pub fn matches(presented: &str, stored: &str) -> bool {
        presented.as_bytes().ct_eq(stored.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_api_key() {
        let key = ApiKeyGenerator::generate();
        assert!(key.starts_with("tc_ak_"));
        assert_eq!(key.len(), 38); // "tc_ak_" (6 chars) + 32 chars
    }

    #[test]
    fn test_webhook_secret_format() {
        let secret = ApiKeyGenerator::webhook_secret();
        assert!(secret.starts_with("whsec_"));
        assert_ne!(secret, ApiKeyGenerator::webhook_secret());
    }

    #[test]
    fn test_short_suffix_is_lowercase() {
        let suffix = ApiKeyGenerator::short_suffix();
        assert_eq!(suffix.len(), 6);
        assert_eq!(suffix, suffix.to_lowercase());
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let key = "tc_ak_123456789012345678901234567890ab";
        assert_eq!(ApiKeyGenerator::fingerprint(key), ApiKeyGenerator::fingerprint(key));
        assert_eq!(ApiKeyGenerator::fingerprint(key).len(), 12);
        assert_ne!(ApiKeyGenerator::fingerprint(key), ApiKeyGenerator::fingerprint("other"));
    }

    #[test]
    fn test_matches_requires_exact_equality() {
        assert!(ApiKeyGenerator::matches("tc_ak_abc", "tc_ak_abc"));
        assert!(!ApiKeyGenerator::matches("tc_ak_abc", "tc_ak_abd"));
        assert!(!ApiKeyGenerator::matches("tc_ak_ab", "tc_ak_abc"));
        assert!(!ApiKeyGenerator::matches("", "tc_ak_abc"));
    }
}
