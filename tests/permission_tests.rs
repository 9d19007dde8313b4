//! 权限解析集成测试

use tenant_core::{
    config::AuthorizationMode,
    error::AppError,
    models::{role::Permission, user::StaticTier},
    services::AuthzDecision,
    tenant::TenantScope,
};

mod common;
use common::TestApp;
use uuid::Uuid;

#[tokio::test]
async fn test_viewer_tier_reads_but_cannot_delete() {
    let app = TestApp::new(AuthorizationMode::StaticTier);
    let (tenant, _) = app.provision("owner@acme.test").await;
    let viewer = app.add_user(tenant.id, Some(StaticTier::Viewer));
    let scope = TenantScope::new(tenant.id);
    let permissions = &app.state.permission_service;

    let decision = permissions.authorize(&viewer, &scope, "contacts.delete").await.unwrap();
    assert!(matches!(decision, AuthzDecision::Deny { .. }));

    let decision = permissions.authorize(&viewer, &scope, "contacts.read").await.unwrap();
    assert_eq!(decision, AuthzDecision::Allow);

    let err = permissions
        .require_permission(&viewer, &scope, "contacts.delete")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(ref p) if p == "contacts.delete"));
}

#[tokio::test]
async fn test_user_without_tier_has_nothing() {
    let app = TestApp::new(AuthorizationMode::StaticTier);
    let (tenant, _) = app.provision("owner@acme.test").await;
    let member = app.add_user(tenant.id, None);

    let resolved = app
        .state
        .permission_service
        .resolve(&member, &TenantScope::new(tenant.id))
        .await
        .unwrap();

    assert!(resolved.is_empty());
}

#[tokio::test]
async fn test_graph_unions_roles_and_groups() {
    let app = TestApp::new(AuthorizationMode::Graph);
    let (tenant, _) = app.provision("owner@acme.test").await;
    let member = app.add_user(tenant.id, None);
    let scope = TenantScope::new(tenant.id);

    app.grant_role(&member, "Sales", &["contacts.read", "contacts.update"]).await;
    app.grant_group(&member, "Support", &["contacts.read", "tickets.read"]).await;

    let resolved = app.state.permission_service.resolve(&member, &scope).await.unwrap();

    assert_eq!(
        resolved.into_vec(),
        vec!["contacts.read", "contacts.update", "tickets.read"]
    );
}

#[tokio::test]
async fn test_adding_a_grant_never_shrinks_the_set() {
    let app = TestApp::new(AuthorizationMode::Graph);
    let (tenant, _) = app.provision("owner@acme.test").await;
    let member = app.add_user(tenant.id, None);
    let scope = TenantScope::new(tenant.id);
    let permissions = &app.state.permission_service;

    app.grant_role(&member, "Reader", &["contacts.read"]).await;
    let before = permissions.resolve(&member, &scope).await.unwrap();

    app.grant_group(&member, "Writers", &["contacts.create"]).await;
    let after = permissions.resolve(&member, &scope).await.unwrap();

    assert!(before.is_subset(&after));
    assert_eq!(after.len(), 2);
}

#[tokio::test]
async fn test_owner_is_unrestricted() {
    let app = TestApp::new(AuthorizationMode::Graph);
    let (tenant, owner) = app.provision("owner@acme.test").await;
    let scope = TenantScope::new(tenant.id);

    for required in ["contacts.delete", "webhooks.create", "anything.at_all"] {
        let decision = app
            .state
            .permission_service
            .authorize(&owner, &scope, required)
            .await
            .unwrap();
        assert!(decision.is_allowed(), "{} should be allowed", required);
    }
}

#[tokio::test]
async fn test_foreign_tenant_resolves_to_nothing() {
    let app = TestApp::new(AuthorizationMode::Graph);
    let (_, owner_a) = app.provision("a@acme.test").await;
    let (tenant_b, _) = app.provision("b@other.test").await;

    let resolved = app
        .state
        .permission_service
        .resolve(&owner_a, &TenantScope::new(tenant_b.id))
        .await
        .unwrap();
    assert!(resolved.is_empty());

    let decision = app
        .state
        .permission_service
        .authorize(&owner_a, &TenantScope::new(tenant_b.id), "contacts.read")
        .await
        .unwrap();
    assert!(!decision.is_allowed());
}

#[tokio::test]
async fn test_inactive_actor_is_denied() {
    let app = TestApp::new(AuthorizationMode::StaticTier);
    let (tenant, _) = app.provision("owner@acme.test").await;
    let mut admin = app.add_user(tenant.id, Some(StaticTier::Admin));
    admin.is_active = false;

    let decision = app
        .state
        .permission_service
        .authorize(&admin, &TenantScope::new(tenant.id), "contacts.read")
        .await
        .unwrap();

    assert!(!decision.is_allowed());
}

#[tokio::test]
async fn test_actor_without_tenant_has_no_scope() {
    let app = TestApp::new(AuthorizationMode::Graph);
    let (tenant, _) = app.provision("owner@acme.test").await;
    let mut orphan = app.add_user(tenant.id, None);
    orphan.tenant_id = None;

    let err = TenantScope::for_actor(&orphan).unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_graph_grants_by_resource_and_action_not_display_name() {
    let app = TestApp::new(AuthorizationMode::Graph);
    let (tenant, _) = app.provision("owner@acme.test").await;
    let member = app.add_user(tenant.id, None);
    let scope = TenantScope::new(tenant.id);

    let read_contacts = Permission {
        id: Uuid::new_v4(),
        name: "Read contacts".to_string(),
        resource: "contacts".to_string(),
        action: "read".to_string(),
        description: None,
    };
    app.grant_role_permissions(&member, "Readers", vec![read_contacts]).await;

    let permissions = &app.state.permission_service;
    let resolved = permissions.resolve(&member, &scope).await.unwrap();
    assert_eq!(resolved.into_vec(), vec!["contacts.read"]);

    let decision = permissions.authorize(&member, &scope, "contacts.read").await.unwrap();
    assert_eq!(decision, AuthzDecision::Allow);
}

#[tokio::test]
async fn test_permission_with_unsplittable_key_is_rejected() {
    let app = TestApp::new(AuthorizationMode::Graph);

    let err = app
        .repos
        .graph
        .upsert_permission(&Permission {
            id: Uuid::new_v4(),
            name: "Read audit logs".to_string(),
            resource: "audit.logs".to_string(),
            action: "read".to_string(),
            description: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}
