use serde::{Deserialize, Serialize};
use thiserror::Error;

use bizgate_core::{OrganizationId, UserId};

use crate::{PermissionName, ResolvedPermissions};

/// A fully resolved principal for authorization decisions.
///
/// Construction of this object is decoupled from storage and transport: the
/// request layer builds it from a session identity plus a fresh resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: UserId,
    /// Organization the request acts within (`None` = unscoped).
    pub organization_id: Option<OrganizationId>,
    pub resolved: ResolvedPermissions,
}

/// How a required-permission list is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Every required permission must be held.
    #[default]
    All,
    /// At least one required permission must be held.
    Any,
}

/// Outcome of the authorization gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthzDecision {
    Allow,
    /// Identity resolved but lacks permission.
    Forbidden,
    /// No resolvable session.
    Unauthenticated,
}

impl AuthzDecision {
    pub fn is_allowed(self) -> bool {
        self == AuthzDecision::Allow
    }

    pub fn into_result(self) -> Result<(), AuthzError> {
        match self {
            AuthzDecision::Allow => Ok(()),
            AuthzDecision::Forbidden => Err(AuthzError::Forbidden),
            AuthzDecision::Unauthenticated => Err(AuthzError::Unauthenticated),
        }
    }
}

/// Denial signal. Deliberately opaque: it never names the missing permission.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthzError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,
}

/// Command-side authorization contract (checked at the route boundary).
///
/// Implement this on commands/queries that require permissions.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[PermissionName];

    fn match_mode(&self) -> MatchMode {
        MatchMode::All
    }
}

/// Decide whether `principal` may act given `required` under `mode`.
///
/// - No IO
/// - No panics
/// - `None` principal means session resolution failed upstream
pub fn authorize(
    principal: Option<&Principal>,
    required: &[PermissionName],
    mode: MatchMode,
) -> AuthzDecision {
    let Some(principal) = principal else {
        return AuthzDecision::Unauthenticated;
    };

    if required.is_empty() {
        return AuthzDecision::Allow;
    }

    // A resolution computed for another organization must never be reused,
    // not even for its privileged bypass.
    if principal.resolved.organization_id != principal.organization_id {
        return AuthzDecision::Forbidden;
    }

    if principal.resolved.is_privileged {
        return AuthzDecision::Allow;
    }

    let held = |p: &PermissionName| principal.resolved.contains(p);
    let granted = match mode {
        MatchMode::All => required.iter().all(held),
        MatchMode::Any => required.iter().any(held),
    };

    if granted {
        AuthzDecision::Allow
    } else {
        AuthzDecision::Forbidden
    }
}

/// Authorize a command against a principal.
pub fn authorize_command<C: CommandAuthorization + ?Sized>(
    principal: Option<&Principal>,
    command: &C,
) -> Result<(), AuthzError> {
    authorize(principal, command.required_permissions(), command.match_mode()).into_result()
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
///
/// Only for administrators inspecting grants. End users get the opaque
/// [`AuthzError`] instead.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub required_permissions: Vec<String>,
    pub mode: MatchMode,
    pub granted: bool,

    /// Human-readable reason for the decision.
    pub reason: String,

    pub principal: PrincipalState,

    /// If denied, this explains what was missing.
    pub denial_reason: Option<DenialReason>,
}

/// State of the principal being checked.
#[derive(Debug, Clone, Serialize)]
pub struct PrincipalState {
    pub user_id: UserId,
    pub organization_id: Option<OrganizationId>,
    pub roles: Vec<String>,
    pub effective_permissions: Vec<String>,
    pub is_privileged: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub missing: Vec<String>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    OrganizationMismatch,
    MissingPermission,
}

/// Explain why an authorization decision was made (or would be made).
///
/// The `granted` field always agrees with [`authorize`] for the same inputs.
pub fn explain_authorization(
    principal: &Principal,
    required: &[PermissionName],
    mode: MatchMode,
) -> AuthorizationExplanation {
    let state = PrincipalState {
        user_id: principal.user_id,
        organization_id: principal.organization_id,
        roles: principal.resolved.roles.iter().map(|r| r.name.clone()).collect(),
        effective_permissions: principal
            .resolved
            .permissions
            .iter()
            .map(|p| p.as_str().to_string())
            .collect(),
        is_privileged: principal.resolved.is_privileged,
    };
    let required_permissions: Vec<String> =
        required.iter().map(|p| p.as_str().to_string()).collect();

    let decision = authorize(Some(principal), required, mode);

    if !decision.is_allowed() && principal.resolved.organization_id != principal.organization_id {
        return AuthorizationExplanation {
            required_permissions,
            mode,
            granted: false,
            reason: "Resolution was computed for a different organization than the request"
                .to_string(),
            principal: state,
            denial_reason: Some(DenialReason {
                kind: DenialKind::OrganizationMismatch,
                message: "Permissions must be resolved for the active organization".to_string(),
                missing: Vec::new(),
                suggestions: vec![
                    "Re-resolve permissions for the organization selected in the session"
                        .to_string(),
                ],
            }),
        };
    }

    if decision.is_allowed() {
        let reason = if required.is_empty() {
            "No permissions are required".to_string()
        } else if principal.resolved.is_privileged {
            "Principal holds a privileged role or permission (bypass)".to_string()
        } else {
            match mode {
                MatchMode::All => "Principal holds every required permission".to_string(),
                MatchMode::Any => "Principal holds at least one required permission".to_string(),
            }
        };

        return AuthorizationExplanation {
            required_permissions,
            mode,
            granted: true,
            reason,
            principal: state,
            denial_reason: None,
        };
    }

    let missing: Vec<String> = required
        .iter()
        .filter(|p| !principal.resolved.contains(p))
        .map(|p| p.as_str().to_string())
        .collect();

    let message = match mode {
        MatchMode::All => format!("Missing required permissions: {missing:?}"),
        MatchMode::Any => format!("Holds none of: {missing:?}"),
    };

    let mut suggestions = vec![format!(
        "Grant a role in this organization that confers {}",
        match mode {
            MatchMode::All => "all of the missing permissions",
            MatchMode::Any => "any of the listed permissions",
        }
    )];
    if principal.resolved.roles.is_empty() {
        suggestions.insert(
            0,
            "Principal holds no roles in this organization; check membership and grants"
                .to_string(),
        );
    }

    AuthorizationExplanation {
        required_permissions,
        mode,
        granted: false,
        reason: format!(
            "Principal's effective permissions {:?} do not satisfy the requirement",
            state.effective_permissions
        ),
        principal: state,
        denial_reason: Some(DenialReason {
            kind: DenialKind::MissingPermission,
            message,
            missing,
            suggestions,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PrivilegePolicy, Role};
    use bizgate_core::RoleId;
    use proptest::prelude::*;

    fn principal(org: OrganizationId, role: &str, perms: &[&str]) -> Principal {
        let roles = vec![Role {
            id: RoleId::new(),
            name: role.to_string(),
            description: String::new(),
        }];
        Principal {
            user_id: UserId::new(),
            organization_id: Some(org),
            resolved: ResolvedPermissions::from_parts(
                Some(org),
                roles,
                perms.iter().map(|p| PermissionName::from(*p)),
                PrivilegePolicy::NameHeuristic,
            ),
        }
    }

    fn req(list: &[&str]) -> Vec<PermissionName> {
        list.iter().map(|p| PermissionName::from(*p)).collect()
    }

    #[test]
    fn editor_scenario() {
        let p = principal(OrganizationId::new(), "Editor", &["ORDER_READ", "ORDER_UPDATE"]);

        assert_eq!(
            authorize(Some(&p), &req(&["ORDER_DELETE"]), MatchMode::Any),
            AuthzDecision::Forbidden
        );
        assert_eq!(
            authorize(Some(&p), &req(&["ORDER_READ"]), MatchMode::Any),
            AuthzDecision::Allow
        );
    }

    #[test]
    fn all_mode_requires_every_permission() {
        let p = principal(OrganizationId::new(), "Editor", &["ORDER_READ"]);
        let required = req(&["ORDER_READ", "ORDER_UPDATE"]);

        assert_eq!(authorize(Some(&p), &required, MatchMode::All), AuthzDecision::Forbidden);
        assert_eq!(authorize(Some(&p), &required, MatchMode::Any), AuthzDecision::Allow);
    }

    #[test]
    fn missing_session_is_unauthenticated_even_for_empty_requirements() {
        assert_eq!(authorize(None, &[], MatchMode::Any), AuthzDecision::Unauthenticated);
    }

    #[test]
    fn privileged_bypass_allows_unknown_permissions() {
        let p = principal(OrganizationId::new(), "Super Admin", &[]);
        assert_eq!(
            authorize(Some(&p), &req(&["anything"]), MatchMode::All),
            AuthzDecision::Allow
        );
    }

    #[test]
    fn resolution_for_other_organization_is_rejected() {
        let mut p = principal(OrganizationId::new(), "Super Admin", &["ORDER_READ"]);
        p.organization_id = Some(OrganizationId::new());
        assert_eq!(
            authorize(Some(&p), &req(&["ORDER_READ"]), MatchMode::All),
            AuthzDecision::Forbidden
        );

        let explanation = explain_authorization(&p, &req(&["ORDER_READ"]), MatchMode::All);
        assert_eq!(
            explanation.denial_reason.unwrap().kind,
            DenialKind::OrganizationMismatch
        );
    }

    #[test]
    fn empty_requirement_allows_even_with_mismatched_resolution() {
        let mut p = principal(OrganizationId::new(), "Editor", &[]);
        p.organization_id = Some(OrganizationId::new());
        assert_eq!(authorize(Some(&p), &[], MatchMode::Any), AuthzDecision::Allow);
        assert!(explain_authorization(&p, &[], MatchMode::Any).granted);
    }

    #[test]
    fn denial_error_does_not_name_permission() {
        let p = principal(OrganizationId::new(), "Editor", &[]);
        let err = authorize(Some(&p), &req(&["ORDER_DELETE"]), MatchMode::All)
            .into_result()
            .unwrap_err();
        assert_eq!(err.to_string(), "forbidden");
    }

    #[test]
    fn explanation_lists_missing_permissions() {
        let p = principal(OrganizationId::new(), "Editor", &["ORDER_READ"]);
        let explanation =
            explain_authorization(&p, &req(&["ORDER_READ", "ORDER_DELETE"]), MatchMode::All);

        assert!(!explanation.granted);
        let denial = explanation.denial_reason.unwrap();
        assert_eq!(denial.kind, DenialKind::MissingPermission);
        assert_eq!(denial.missing, vec!["ORDER_DELETE".to_string()]);
    }

    #[test]
    fn explanation_reports_bypass() {
        let p = principal(OrganizationId::new(), "Superuser", &[]);
        let explanation = explain_authorization(&p, &req(&["ORDER_DELETE"]), MatchMode::All);
        assert!(explanation.granted);
        assert!(explanation.reason.contains("bypass"));
    }

    struct DeleteOrder;

    impl CommandAuthorization for DeleteOrder {
        fn required_permissions(&self) -> &[PermissionName] {
            const REQUIRED: &[PermissionName] = &[PermissionName::from_static("ORDER_DELETE")];
            REQUIRED
        }
    }

    #[test]
    fn command_contract_uses_declared_permissions() {
        let p = principal(OrganizationId::new(), "Editor", &["ORDER_DELETE"]);
        assert!(authorize_command(Some(&p), &DeleteOrder).is_ok());

        let p = principal(OrganizationId::new(), "Viewer", &["ORDER_READ"]);
        assert_eq!(authorize_command(Some(&p), &DeleteOrder), Err(AuthzError::Forbidden));
    }

    proptest! {
        #[test]
        fn empty_requirement_always_allows(perms in proptest::collection::vec("[A-Z_]{1,12}", 0..6)) {
            let refs: Vec<&str> = perms.iter().map(String::as_str).collect();
            let p = principal(OrganizationId::new(), "Clerk", &refs);
            prop_assert_eq!(authorize(Some(&p), &[], MatchMode::All), AuthzDecision::Allow);
            prop_assert_eq!(authorize(Some(&p), &[], MatchMode::Any), AuthzDecision::Allow);
        }

        #[test]
        fn all_implies_any(
            held in proptest::collection::btree_set("[A-Z]{1,4}", 0..6),
            required in proptest::collection::vec("[A-Z]{1,4}", 1..4),
        ) {
            let held: Vec<&str> = held.iter().map(String::as_str).collect();
            let p = principal(OrganizationId::new(), "Clerk", &held);
            let required: Vec<PermissionName> =
                required.iter().map(|r| PermissionName::from(r.as_str())).collect();

            if authorize(Some(&p), &required, MatchMode::All).is_allowed() {
                prop_assert!(authorize(Some(&p), &required, MatchMode::Any).is_allowed());
            }
        }

        #[test]
        fn explanation_agrees_with_gate(
            held in proptest::collection::btree_set("[A-Z]{1,3}", 0..5),
            required in proptest::collection::vec("[A-Z]{1,3}", 0..4),
            any in any::<bool>(),
        ) {
            let held: Vec<&str> = held.iter().map(String::as_str).collect();
            let p = principal(OrganizationId::new(), "Clerk", &held);
            let required: Vec<PermissionName> =
                required.iter().map(|r| PermissionName::from(r.as_str())).collect();
            let mode = if any { MatchMode::Any } else { MatchMode::All };

            let explanation = explain_authorization(&p, &required, mode);
            prop_assert_eq!(explanation.granted, authorize(Some(&p), &required, mode).is_allowed());
        }
    }
}
