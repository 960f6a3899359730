//! Saving, deleting and cloning user accounts.
//!
//! Validation and cloning are pluggable; persistence goes through
//! [`UserPersistence`]. The `*_as` variants authorize the acting user first.

use std::sync::Arc;

use tracing::{info, instrument};

use sitegate_core::{DomainError, Entity, UserId};

use crate::PrivilegeLevel;
use crate::decision::AuthError;
use crate::object::ResourceAuthorizer;
use crate::store::UserPersistence;
use crate::user::User;
use crate::user_rules::{authorize_delete_user_info, authorize_set_user_info};

pub const MAX_USER_NAME_LEN: usize = 100;

/// Rejects accounts that must not be persisted.
pub trait UserValidator: Send + Sync {
    fn validate(&self, user: &User) -> Result<(), DomainError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultUserValidator;

impl UserValidator for DefaultUserValidator {
    fn validate(&self, user: &User) -> Result<(), DomainError> {
        let name = user.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("user name is required"));
        }
        if name.chars().count() > MAX_USER_NAME_LEN {
            return Err(DomainError::validation(format!(
                "user name exceeds {MAX_USER_NAME_LEN} characters"
            )));
        }
        if user.guid.is_nil() {
            return Err(DomainError::validation("user GUID must not be nil"));
        }
        if user.is_public() && user.privilege_level != PrivilegeLevel::None {
            return Err(DomainError::invariant("the public account cannot be privileged"));
        }
        Ok(())
    }
}

/// Produces a new, unsaved account from an existing one.
pub trait UserCloner: Send + Sync {
    fn clone_user(&self, source: &User, new_name: &str) -> User;
}

/// Copies privilege level, flags and site-role claims. The copy gets a fresh
/// GUID and no persisted identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultUserCloner;

impl UserCloner for DefaultUserCloner {
    fn clone_user(&self, source: &User, new_name: &str) -> User {
        let mut copy =
            User::new(UserId::unsaved(), new_name).with_privilege_level(source.privilege_level);
        copy.enabled = source.enabled;
        copy.is_external = source.is_external;
        copy.is_domain = source.is_domain;
        copy.has_allowed_cultures = source.has_allowed_cultures;
        copy.site_roles = source.site_roles.clone();
        copy
    }
}

pub struct UserService<P> {
    persistence: P,
    validator: Arc<dyn UserValidator>,
    cloner: Arc<dyn UserCloner>,
}

impl<P> UserService<P>
where
    P: UserPersistence,
{
    pub fn new(persistence: P) -> Self {
        Self {
            persistence,
            validator: Arc::new(DefaultUserValidator),
            cloner: Arc::new(DefaultUserCloner),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn UserValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_cloner(mut self, cloner: Arc<dyn UserCloner>) -> Self {
        self.cloner = cloner;
        self
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    /// Validate and persist `user`, recording the saved values as original.
    #[instrument(skip(self, user))]
    pub fn save(&self, user: &mut User) -> Result<UserId, AuthError> {
        self.validator.validate(user)?;
        let id = self.persistence.save_user(user)?;
        user.id = id;
        user.mark_persisted();
        user.invalidate_security_collections();
        info!(user_id = %id, user_name = user.code_name(), "user saved");
        Ok(id)
    }

    /// [`save`](Self::save) after checking that `acting` may create or modify `user`.
    pub fn save_as(
        &self,
        authorizer: &dyn ResourceAuthorizer,
        acting: &User,
        user: &mut User,
        site_name: Option<&str>,
    ) -> Result<UserId, AuthError> {
        let is_create = !user.id.is_saved();
        authorize_set_user_info(authorizer, acting, user, is_create, site_name)?
            .map_err(AuthError::SecurityViolation)?;
        self.save(user)
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub fn delete(&self, user: &User) -> Result<(), AuthError> {
        if !user.id.is_saved() {
            return Err(DomainError::validation("cannot delete an unsaved user").into());
        }
        self.persistence.delete_user(user.id)?;
        user.invalidate_security_collections();
        info!("user deleted");
        Ok(())
    }

    pub fn delete_as(
        &self,
        authorizer: &dyn ResourceAuthorizer,
        acting: &User,
        user: &User,
        site_name: Option<&str>,
    ) -> Result<(), AuthError> {
        authorize_delete_user_info(authorizer, acting, user, site_name)?
            .map_err(AuthError::SecurityViolation)?;
        self.delete(user)
    }

    /// Clone `source` under `new_name` and persist the copy.
    pub fn clone_user(&self, source: &User, new_name: &str) -> Result<User, AuthError> {
        if self.persistence.find_user(new_name)?.is_some() {
            let message = format!("user name '{new_name}' is already taken");
            return Err(DomainError::validation(message).into());
        }
        let mut copy = self.cloner.clone_user(source, new_name);
        self.save(&mut copy)?;
        Ok(copy)
    }
}
