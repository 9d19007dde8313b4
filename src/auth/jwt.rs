//! HS256 访问令牌，`TC_SECURITY__AUTHENTICATOR=jwt` 时替代会话令牌

use crate::{config::AppConfig, error::AppError, models::user::User};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ISSUER: &str = "tenant-core";

/// 时钟漂移容忍（秒）
const LEEWAY_SECS: u64 = 30;

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    /// 签发时所属租户，未开通时为空
    pub tenant_id: Option<Uuid>,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let secret = config.security.jwt_secret.expose_secret().as_bytes();
        if secret.len() < MIN_SECRET_LEN {
            return Err(AppError::Config(format!(
                "jwt secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl: Duration::seconds(config.security.access_token_exp_secs as i64),
        })
    }

    pub fn generate_access_token(&self, user: &User) -> Result<String, AppError> {
        let issued_at = Utc::now();
        let claims = Claims {
            sub: user.id,
            tenant_id: user.tenant_id,
            iss: ISSUER.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + self.ttl).timestamp(),
            jti: Uuid::new_v4(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!(error = %e, user_id = %user.id, "access token encoding failed");
            AppError::internal_error("could not issue access token")
        })
    }

    /// 签名、过期、签发者任一不符都按认证失败处理，细节只进 debug 日志
    pub fn validate_token(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(reason = ?e.kind(), "access token rejected");
                AppError::authentication("invalid or expired token")
            })
    }
}
