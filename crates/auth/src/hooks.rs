//! Extension points consulted by the engine.

use crate::user::User;

/// Lets the host application override individual authorization results.
///
/// Both methods receive the engine's result and return the final one.
pub trait AuthorizationHooks: Send + Sync {
    fn resource_checked(
        &self,
        _user: &User,
        _resource_name: &str,
        _permission_name: &str,
        _site_name: Option<&str>,
        authorized: bool,
    ) -> bool {
        authorized
    }

    fn ui_element_checked(
        &self,
        _user: &User,
        _resource_name: &str,
        _element_name: &str,
        _site_name: Option<&str>,
        authorized: bool,
    ) -> bool {
        authorized
    }
}

/// Leaves every result unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl AuthorizationHooks for NoHooks {}

/// Whether the current request carries an authenticated identity.
pub trait AuthenticationState: Send + Sync {
    fn is_authenticated(&self) -> bool;
}

/// A fixed answer, for services that authenticate up front (and for tests).
#[derive(Debug, Clone, Copy)]
pub struct StaticAuthentication(pub bool);

impl AuthenticationState for StaticAuthentication {
    fn is_authenticated(&self) -> bool {
        self.0
    }
}
