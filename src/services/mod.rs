//! Business logic services layer

pub mod audit_service;
pub mod event_service;
pub mod permission_service;
pub mod session_service;
pub mod tenant_service;
pub mod webhook_service;

pub use audit_service::{AuditService, AuditWriteError};
pub use event_service::EventService;
pub use permission_service::{AuthzDecision, PermissionService};
pub use session_service::SessionService;
pub use tenant_service::TenantService;
pub use webhook_service::WebhookService;
