//! Site-level settings that shape how member queries are assembled.
//!
//! Settings are read with the `config` crate: an optional TOML file first, then
//! environment overrides prefixed with `MEMBER_QUERY__` (double underscore as the
//! separator, e.g. `MEMBER_QUERY__PROFILE_SYNC=false`). Anything left unset keeps
//! the defaults below.

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

pub const ENV_PREFIX: &str = "MEMBER_QUERY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Component name stamped on last-activity rows.
    pub members_component: String,
    /// Heartbeat interval of the presence tracker.
    pub presence_interval_secs: i64,
    /// Grace period after the last heartbeat during which a member still counts as online.
    pub presence_time_span_secs: i64,
    /// Whether display names are synced from the profile full-name field.
    pub profile_sync: bool,
    pub xprofile_active: bool,
    pub friends_active: bool,
    pub fullname_field_id: i64,
    pub friend_count_key: String,
    pub latest_update_key: String,
    /// Site whose taxonomy holds the member types.
    pub taxonomy_site_id: i64,
    /// Multisite installs also flag spam and deleted accounts.
    pub multisite: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            members_component: "members".to_string(),
            presence_interval_secs: 60,
            presence_time_span_secs: 240,
            profile_sync: true,
            xprofile_active: true,
            friends_active: true,
            fullname_field_id: 1,
            friend_count_key: "total_friend_count".to_string(),
            latest_update_key: "bp_latest_update".to_string(),
            taxonomy_site_id: 1,
            multisite: false,
        }
    }
}

impl Settings {
    /// Loads settings from an optional file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        debug!(?settings, "settings loaded");
        Ok(settings)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Seconds since the last heartbeat within which a member is listed as online.
    pub fn online_window_secs(&self) -> i64 {
        self.presence_interval_secs + self.presence_time_span_secs
    }

    /// Predicate over the users table selecting accounts that may be listed.
    pub fn status_sql(&self, alias: &str) -> String {
        let prefix = if alias.is_empty() {
            String::new()
        } else {
            format!("{alias}.")
        };
        if self.multisite {
            format!("{prefix}user_status = 0 AND {prefix}spam = 0 AND {prefix}deleted = 0")
        } else {
            format!("{prefix}user_status = 0")
        }
    }

    /// Alphabetical sorts read the profile field table only when names are not synced.
    pub fn sorts_by_profile_field(&self) -> bool {
        !self.profile_sync && self.xprofile_active
    }
}
