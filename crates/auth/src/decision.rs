//! Authorization outcomes.
//!
//! Every check produces a [`Decision`]. Boolean entry points convert it with a
//! [`FailureMode`], which decides whether a denial is an ordinary `false` or an
//! [`AuthError`].

use serde::Serialize;
use thiserror::Error;

use sitegate_core::DomainError;

use crate::store::StoreError;

/// Why access was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Granted {
    GlobalAdministrator,
    Administrator,
    /// Pseudo-roles (`everyone`, `authenticated`, ...) or privilege-level checks.
    Implicit,
    /// A user acting on their own account.
    SelfService,
    /// The user holds a role (or UI element) the check requires.
    RoleGrant,
    /// UI personalization is off for the site; every element is visible.
    PersonalizationDisabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    AdministratorRequired,
    SelfEscalation,
    EditorPromotion,
    SelfDelete,
    MissingPermission,
    MissingUIElement,
}

/// Why access was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Denial {
    pub kind: DenialKind,
    pub message: String,
}

impl Denial {
    pub fn new(kind: DenialKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn administrator_required() -> Self {
        Self::new(
            DenialKind::AdministratorRequired,
            "administrator privilege required",
        )
    }

    pub fn self_escalation() -> Self {
        Self::new(
            DenialKind::SelfEscalation,
            "users cannot raise their own privilege level to global administrator",
        )
    }

    pub fn editor_promotion() -> Self {
        Self::new(
            DenialKind::EditorPromotion,
            "only editors may create or promote editors",
        )
    }

    pub fn self_delete() -> Self {
        Self::new(DenialKind::SelfDelete, "users cannot delete their own account")
    }

    pub fn missing_permission(resource_name: &str, permission_name: &str) -> Self {
        Self::new(
            DenialKind::MissingPermission,
            format!("missing permission '{permission_name}' on resource '{resource_name}'"),
        )
    }

    pub fn missing_ui_element(resource_name: &str, element_name: &str) -> Self {
        Self::new(
            DenialKind::MissingUIElement,
            format!("UI element '{element_name}' of resource '{resource_name}' is not granted"),
        )
    }
}

impl core::fmt::Display for Denial {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.message)
    }
}

pub type Decision = Result<Granted, Denial>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("permission '{permission}' on resource '{resource}' denied")]
    PermissionCheckFailure {
        resource: String,
        permission: String,
        site: Option<String>,
    },

    #[error("security violation: {0}")]
    SecurityViolation(Denial),

    /// A site, resource or permission the check depends on does not exist.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// What a boolean check does with a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    #[default]
    ReturnFalse,
    Raise,
}

impl FailureMode {
    /// Collapse a decision into a boolean, or into `raise(denial)` in strict mode.
    pub fn resolve(
        self,
        decision: Decision,
        raise: impl FnOnce(Denial) -> AuthError,
    ) -> Result<bool, AuthError> {
        match (decision, self) {
            (Ok(_), _) => Ok(true),
            (Err(_), FailureMode::ReturnFalse) => Ok(false),
            (Err(denial), FailureMode::Raise) => Err(raise(denial)),
        }
    }
}
