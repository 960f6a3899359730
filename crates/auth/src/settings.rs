//! Authorization settings.
//!
//! Settings come from environment variables (with defaults when unset) or from
//! a JSON document. They also answer the site-setting and license questions
//! the engine asks, via [`SiteSettings`] and [`LicenseGate`].

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::collections::normalize;

pub const ENV_SETTINGS_FILE: &str = "SITEGATE_SETTINGS_FILE";
pub const ENV_MEMBERSHIPS_LICENSED: &str = "SITEGATE_MEMBERSHIPS_LICENSED";
pub const ENV_REQUIREMENT_CACHE_TTL_SECS: &str = "SITEGATE_REQUIREMENT_CACHE_TTL_SECS";
pub const ENV_SITE_ADMINS_EDIT_CODE: &str = "SITEGATE_SITE_ADMINS_EDIT_CODE";
pub const ENV_PERSONALIZE_UI: &str = "SITEGATE_PERSONALIZE_UI";

/// Per-site answers the engine needs.
pub trait SiteSettings: Send + Sync {
    /// Whether site administrators may edit ASCX/SQL code on the site.
    fn site_admins_may_edit_code(&self, site_name: Option<&str>) -> bool;

    /// Whether UI-element personalization applies on the site.
    fn personalize_ui(&self, site_name: Option<&str>) -> bool;
}

/// License feature gate.
pub trait LicenseGate: Send + Sync {
    /// Whether membership-derived roles may broaden access.
    fn memberships_allowed(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings document: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteOverrides {
    pub site_admins_may_edit_code: Option<bool>,
    pub personalize_ui: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationSettings {
    pub memberships_licensed: bool,
    pub requirement_cache_ttl_secs: u64,
    pub site_admins_may_edit_code: bool,
    pub personalize_ui: bool,
    /// Overrides keyed by lowercased site name.
    pub sites: HashMap<String, SiteOverrides>,
}

impl Default for AuthorizationSettings {
    fn default() -> Self {
        Self {
            memberships_licensed: true,
            requirement_cache_ttl_secs: 300,
            site_admins_may_edit_code: false,
            personalize_ui: true,
            sites: HashMap::new(),
        }
    }
}

impl AuthorizationSettings {
    /// Load from the process environment.
    ///
    /// If `SITEGATE_SETTINGS_FILE` is set the JSON file is the base; individual
    /// variables override it.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let mut settings = match lookup(ENV_SETTINGS_FILE) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(v) = parse_var(&lookup, ENV_MEMBERSHIPS_LICENSED) {
            settings.memberships_licensed = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_REQUIREMENT_CACHE_TTL_SECS) {
            settings.requirement_cache_ttl_secs = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_SITE_ADMINS_EDIT_CODE) {
            settings.site_admins_may_edit_code = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_PERSONALIZE_UI) {
            settings.personalize_ui = v;
        }

        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, SettingsError> {
        let mut settings: Self = serde_json::from_str(raw)?;
        settings.sites = settings
            .sites
            .into_iter()
            .map(|(site, overrides)| (normalize(&site), overrides))
            .collect();
        Ok(settings)
    }

    pub fn requirement_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.requirement_cache_ttl_secs)
    }

    fn overrides(&self, site_name: Option<&str>) -> Option<&SiteOverrides> {
        site_name.and_then(|site| self.sites.get(&normalize(site)))
    }
}

impl SiteSettings for AuthorizationSettings {
    fn site_admins_may_edit_code(&self, site_name: Option<&str>) -> bool {
        self.overrides(site_name)
            .and_then(|o| o.site_admins_may_edit_code)
            .unwrap_or(self.site_admins_may_edit_code)
    }

    fn personalize_ui(&self, site_name: Option<&str>) -> bool {
        self.overrides(site_name)
            .and_then(|o| o.personalize_ui)
            .unwrap_or(self.personalize_ui)
    }
}

impl LicenseGate for AuthorizationSettings {
    fn memberships_allowed(&self) -> bool {
        self.memberships_licensed
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = AuthorizationSettings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(settings, AuthorizationSettings::default());
        assert!(settings.memberships_allowed());
        assert!(settings.personalize_ui(Some("acme")));
        assert!(!settings.site_admins_may_edit_code(Some("acme")));
    }

    #[test]
    fn env_values_override_defaults() {
        let settings = AuthorizationSettings::from_lookup(lookup_from(&[
            (ENV_MEMBERSHIPS_LICENSED, "false"),
            (ENV_REQUIREMENT_CACHE_TTL_SECS, "30"),
            (ENV_PERSONALIZE_UI, "nope"),
        ]))
        .unwrap();
        assert!(!settings.memberships_licensed);
        assert_eq!(settings.requirement_cache_ttl(), Duration::from_secs(30));
        assert!(settings.personalize_ui);
    }

    #[test]
    fn json_site_overrides_are_case_insensitive() {
        let settings = AuthorizationSettings::from_json(
            r#"{
                "site_admins_may_edit_code": false,
                "sites": { "Acme": { "site_admins_may_edit_code": true, "personalize_ui": false } }
            }"#,
        )
        .unwrap();
        assert!(settings.site_admins_may_edit_code(Some("ACME")));
        assert!(!settings.site_admins_may_edit_code(Some("other")));
        assert!(!settings.personalize_ui(Some("acme")));
        assert!(settings.personalize_ui(None));
        assert_eq!(settings.requirement_cache_ttl_secs, 300);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = AuthorizationSettings::from_lookup(lookup_from(&[(
            ENV_SETTINGS_FILE,
            "/nonexistent/sitegate.json",
        )]))
        .unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }
}
