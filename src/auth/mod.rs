//! Authentication module
//! 会话令牌与 JWT 两种认证方式实现同一个 Authenticator 接口

pub mod api_key;
pub mod authenticator;
pub mod identity;
pub mod jwt;
pub mod middleware;

pub use api_key::ApiKeyGenerator;
pub use authenticator::{Authenticator, Credential, JwtAuthenticator, SessionAuthenticator};
pub use identity::{HttpIdentityProvider, IdentityProvider, VerifiedIdentity};
pub use jwt::{Claims, JwtService};
pub use middleware::{auth_middleware, extract_credential, AuthContext};
