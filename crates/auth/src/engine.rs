//! The authorization decision engine.
//!
//! All checks read the user's cached [`SecurityCollections`], building it on
//! first use. Expired grants found during a lookup are evicted from the cached
//! snapshot by swapping in a copy without them; nothing is written back to the
//! store.

use std::sync::Arc;

use tracing::{debug, warn};

use sitegate_core::Clock;

use crate::PrivilegeLevel;
use crate::cache::RequirementCache;
use crate::collections::{
    GLOBAL_ROLES_KEY, GrantState, SecurityCollections, element_key, normalize, scope_key,
};
use crate::decision::{AuthError, Decision, Denial, FailureMode, Granted};
use crate::hooks::{AuthenticationState, AuthorizationHooks, NoHooks, StaticAuthentication};
use crate::lookup::SecurityCollectionsBuilder;
use crate::object::{Permission, ResourceAuthorizer, SecuredObject};
use crate::settings::{AuthorizationSettings, SiteSettings};
use crate::store::{MembershipStore, RoleRequirements};
use crate::user::User;

pub const ROLE_EVERYONE: &str = "everyone";
pub const ROLE_AUTHENTICATED: &str = "authenticated";
pub const ROLE_NOT_AUTHENTICATED: &str = "notauthenticated";

pub const GLOBAL_PERMISSIONS_RESOURCE: &str = "cms.globalpermissions";
pub const DESIGN_RESOURCE: &str = "cms.design";
pub const EDIT_CODE_PERMISSION: &str = "editcode";
pub const EDIT_SQL_CODE_PERMISSION: &str = "editsqlcode";

/// Where [`AuthorizationEngine::is_in_role`] looks besides the site itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleScope {
    pub check_global: bool,
    pub check_membership: bool,
}

impl Default for RoleScope {
    fn default() -> Self {
        Self {
            check_global: true,
            check_membership: true,
        }
    }
}

/// Options for UI-element checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementCheck {
    /// Evaluate the element grants only, without the administrator and
    /// personalization bypasses.
    pub elements_only: bool,
    /// Fall back to global-scope grants when the site grants are missing.
    pub check_global_roles: bool,
}

impl Default for ElementCheck {
    fn default() -> Self {
        Self {
            elements_only: false,
            check_global_roles: true,
        }
    }
}

pub struct AuthorizationEngine<S, R> {
    builder: SecurityCollectionsBuilder<S>,
    requirements: RequirementCache<R>,
    site_settings: Arc<dyn SiteSettings>,
    authentication: Arc<dyn AuthenticationState>,
    hooks: Arc<dyn AuthorizationHooks>,
    clock: Arc<dyn Clock>,
}

impl<S, R> AuthorizationEngine<S, R>
where
    S: MembershipStore,
    R: RoleRequirements,
{
    pub fn new(
        store: S,
        requirements: R,
        settings: Arc<AuthorizationSettings>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            builder: SecurityCollectionsBuilder::new(store, settings.clone()),
            requirements: RequirementCache::new(
                requirements,
                Arc::clone(&clock),
                settings.requirement_cache_ttl(),
            ),
            site_settings: settings,
            authentication: Arc::new(StaticAuthentication(true)),
            hooks: Arc::new(NoHooks),
            clock,
        }
    }

    pub fn with_site_settings(mut self, site_settings: Arc<dyn SiteSettings>) -> Self {
        self.site_settings = site_settings;
        self
    }

    pub fn with_authentication(mut self, authentication: Arc<dyn AuthenticationState>) -> Self {
        self.authentication = authentication;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn AuthorizationHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn store(&self) -> &S {
        self.builder.store()
    }

    pub fn requirements(&self) -> &RequirementCache<R> {
        &self.requirements
    }

    /// The user's snapshot, built on first access.
    pub fn collections(&self, user: &User) -> Result<Arc<SecurityCollections>, AuthError> {
        Ok(user.security_collections(|id| self.builder.build_for(id))?)
    }

    /// Whether the user's privilege level reaches `required`.
    ///
    /// An editor only counts as an editor on sites they belong to.
    pub fn check_privilege_level(
        &self,
        user: &User,
        required: PrivilegeLevel,
        site_name: Option<&str>,
    ) -> Result<bool, AuthError> {
        let mut level = user.privilege_level;
        if level == PrivilegeLevel::Editor {
            if let Some(site) = site_name {
                if !self.collections(user)?.is_in_site(site) {
                    level = PrivilegeLevel::None;
                }
            }
        }
        Ok(level >= required)
    }

    pub fn is_in_role(
        &self,
        user: &User,
        role_name: &str,
        site_name: Option<&str>,
        scope: RoleScope,
    ) -> Result<bool, AuthError> {
        match normalize(role_name).as_str() {
            ROLE_EVERYONE => return Ok(true),
            ROLE_AUTHENTICATED => return Ok(self.is_authenticated(user)),
            ROLE_NOT_AUTHENTICATED => return Ok(!self.is_authenticated(user)),
            _ => {}
        }

        let collections = self.collections(user)?;
        let now = self.clock.now();

        for scope_name in lookup_scopes(site_name, scope.check_global) {
            match collections.role_state(&scope_name, role_name, now) {
                GrantState::Valid => return Ok(true),
                GrantState::Expired => {
                    debug!(
                        user_id = %user.id,
                        role = role_name,
                        scope = %scope_name,
                        "evicting expired role"
                    );
                    user.evict_security(|c| c.without_role(&scope_name, role_name));
                }
                GrantState::Absent => {}
            }

            if scope.check_membership {
                match collections.membership_role_state(&scope_name, role_name, now) {
                    GrantState::Valid => return Ok(true),
                    GrantState::Expired => {
                        debug!(
                            user_id = %user.id,
                            role = role_name,
                            scope = %scope_name,
                            "evicting expired membership role"
                        );
                        user.evict_security(|c| {
                            c.without_membership_role(&scope_name, role_name)
                        });
                    }
                    GrantState::Absent => {}
                }
            }
        }

        Ok(false)
    }

    pub fn is_in_membership(
        &self,
        user: &User,
        membership_name: &str,
        site_name: Option<&str>,
        check_global: bool,
    ) -> Result<bool, AuthError> {
        let collections = self.collections(user)?;
        let now = self.clock.now();

        for scope_name in lookup_scopes(site_name, check_global) {
            match collections.membership_state(&scope_name, membership_name, now) {
                GrantState::Valid => return Ok(true),
                GrantState::Expired => {
                    debug!(
                        user_id = %user.id,
                        membership = membership_name,
                        scope = %scope_name,
                        "evicting expired membership"
                    );
                    user.evict_security(|c| c.without_membership(&scope_name, membership_name));
                }
                GrantState::Absent => {}
            }
        }

        Ok(false)
    }

    pub fn is_culture_allowed(
        &self,
        user: &User,
        culture_code: &str,
        site_name: &str,
    ) -> Result<bool, AuthError> {
        if user.privilege_level == PrivilegeLevel::GlobalAdmin || !user.has_allowed_cultures {
            return Ok(true);
        }
        Ok(self.collections(user)?.culture_allowed(site_name, culture_code))
    }

    pub fn is_authorized_per_resource(
        &self,
        user: &User,
        resource_name: &str,
        permission_name: &str,
        site_name: Option<&str>,
        mode: FailureMode,
    ) -> Result<bool, AuthError> {
        let decision = self.authorize_resource(user, resource_name, permission_name, site_name)?;
        mode.resolve(decision, |_| AuthError::PermissionCheckFailure {
            resource: resource_name.to_string(),
            permission: permission_name.to_string(),
            site: site_name.map(str::to_string),
        })
    }

    /// Decide whether every element in `element_names` is visible to the user.
    pub fn authorize_ui_elements(
        &self,
        user: &User,
        resource_name: &str,
        element_names: &[&str],
        site_name: Option<&str>,
        check: ElementCheck,
    ) -> Result<Decision, AuthError> {
        if user.privilege_level == PrivilegeLevel::GlobalAdmin {
            return Ok(Ok(Granted::GlobalAdministrator));
        }
        if !check.elements_only {
            if !self.site_settings.personalize_ui(site_name) {
                return Ok(Ok(Granted::PersonalizationDisabled));
            }
            if user.privilege_level.is_admin_or_above() {
                return Ok(Ok(Granted::Administrator));
            }
        }

        let collections = self.collections(user)?;
        let now = self.clock.now();

        for element in element_names {
            let key = element_key(resource_name, element);
            let mut granted = site_name.is_some_and(|_| {
                collections.ui_element_state(&scope_key(site_name), &key, now) == GrantState::Valid
            });
            if !granted && (check.check_global_roles || site_name.is_none()) {
                granted =
                    collections.ui_element_state(GLOBAL_ROLES_KEY, &key, now) == GrantState::Valid;
            }
            granted = self
                .hooks
                .ui_element_checked(user, resource_name, element, site_name, granted);

            if !granted {
                debug!(
                    user_id = %user.id,
                    resource = resource_name,
                    element = *element,
                    "UI element denied"
                );
                return Ok(Err(Denial::missing_ui_element(resource_name, element)));
            }
        }

        Ok(Ok(Granted::RoleGrant))
    }

    pub fn is_authorized_per_ui_element(
        &self,
        user: &User,
        resource_name: &str,
        element_names: &[&str],
        site_name: Option<&str>,
        check: ElementCheck,
        mode: FailureMode,
    ) -> Result<bool, AuthError> {
        let decision =
            self.authorize_ui_elements(user, resource_name, element_names, site_name, check)?;
        mode.resolve(decision, AuthError::SecurityViolation)
    }

    pub fn authorize_object(
        &self,
        acting: &User,
        permission: Permission,
        target: &dyn SecuredObject,
        site_name: Option<&str>,
    ) -> Result<Decision, AuthError> {
        target.authorize(self, acting, permission, site_name)
    }

    pub fn is_authorized_per_object(
        &self,
        acting: &User,
        permission: Permission,
        target: &dyn SecuredObject,
        site_name: Option<&str>,
        mode: FailureMode,
    ) -> Result<bool, AuthError> {
        let decision = self.authorize_object(acting, permission, target, site_name)?;
        if let Err(denial) = &decision {
            debug!(
                user_id = %acting.id,
                object = target.object_type(),
                permission = %permission,
                reason = %denial,
                "object permission denied"
            );
        }
        mode.resolve(decision, AuthError::SecurityViolation)
    }

    fn is_authenticated(&self, user: &User) -> bool {
        !user.is_public() && self.authentication.is_authenticated()
    }
}

impl<S, R> ResourceAuthorizer for AuthorizationEngine<S, R>
where
    S: MembershipStore,
    R: RoleRequirements,
{
    fn authorize_resource(
        &self,
        user: &User,
        resource_name: &str,
        permission_name: &str,
        site_name: Option<&str>,
    ) -> Result<Decision, AuthError> {
        if user.privilege_level == PrivilegeLevel::GlobalAdmin {
            return Ok(Ok(Granted::GlobalAdministrator));
        }

        let permission = normalize(permission_name);
        let mut resource = normalize(resource_name);
        if resource == GLOBAL_PERMISSIONS_RESOURCE && permission == EDIT_CODE_PERMISSION {
            resource = DESIGN_RESOURCE.to_string();
        }

        if user.privilege_level == PrivilegeLevel::Admin {
            let edits_code =
                permission == EDIT_CODE_PERMISSION || permission == EDIT_SQL_CODE_PERMISSION;
            if !edits_code || self.site_settings.site_admins_may_edit_code(site_name) {
                return Ok(Ok(Granted::Administrator));
            }
        }

        let Some(required) = self.requirements.required_roles(&resource, &permission)? else {
            warn!(resource = %resource, permission = %permission, "permission is not registered");
            return Err(AuthError::ConfigurationMissing(format!(
                "permission '{permission}' of resource '{resource}'"
            )));
        };

        let held = self.collections(user)?.valid_role_ids(site_name, self.clock.now());
        let authorized = held.iter().any(|role| required.contains(role));
        let authorized = self
            .hooks
            .resource_checked(user, resource_name, permission_name, site_name, authorized);

        if authorized {
            Ok(Ok(Granted::RoleGrant))
        } else {
            debug!(
                user_id = %user.id,
                resource = %resource,
                permission = %permission,
                "resource permission denied"
            );
            Ok(Err(Denial::missing_permission(&resource, &permission)))
        }
    }
}

/// Scope keys to consult: the site first, then the global bucket.
fn lookup_scopes(site_name: Option<&str>, check_global: bool) -> Vec<String> {
    let mut scopes = Vec::with_capacity(2);
    if site_name.is_some() {
        scopes.push(scope_key(site_name));
    }
    if check_global || site_name.is_none() {
        scopes.push(GLOBAL_ROLES_KEY.to_string());
    }
    scopes.dedup();
    scopes
}
