//! `sitegate-auth`: user authorization and role/membership resolution.
//!
//! This crate is decoupled from storage: rows come in through the
//! [`store`] ports and decisions go out as [`Decision`] values or booleans.

pub mod cache;
pub mod collections;
pub mod decision;
pub mod engine;
pub mod hooks;
pub mod lookup;
pub mod object;
pub mod privilege;
pub mod reconcile;
pub mod service;
pub mod settings;
pub mod store;
pub mod ui_elements;
pub mod user;
pub mod user_rules;

pub use cache::RequirementCache;
pub use collections::{GLOBAL_ROLES_KEY, GrantState, SecurityCollections, Validity};
pub use decision::{AuthError, Decision, Denial, DenialKind, FailureMode, Granted};
pub use engine::{AuthorizationEngine, ElementCheck, RoleScope};
pub use hooks::{AuthenticationState, AuthorizationHooks, NoHooks, StaticAuthentication};
pub use lookup::SecurityCollectionsBuilder;
pub use object::{Permission, ResourceAuthorizer, SecuredObject};
pub use privilege::PrivilegeLevel;
pub use reconcile::{ReconcileReport, Reconciler};
pub use service::{DefaultUserCloner, DefaultUserValidator, UserCloner, UserService, UserValidator};
pub use settings::{AuthorizationSettings, LicenseGate, SettingsError, SiteSettings};
pub use store::{
    MembershipStore, NewRole, RoleInfo, RoleQuery, RoleRequirements, SiteInfo, StoreError,
    UIElementGrantRow, UserCultureRow, UserMembershipRow, UserPersistence, UserRoleRow,
    UserSiteRow,
};
pub use user::{PUBLIC_USER_NAME, User, UserSnapshot};
