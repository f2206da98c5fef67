//! Access-key credentials for key-based artifact stores
//!
//! Keys come from an AWS-style ini profile (`[default]` section) when a
//! credentials file is configured, otherwise from `ACCESS_KEY_ID` /
//! `SECRET_ACCESS_KEY`. Problems are logged and leave the keys empty; the
//! deployment goes ahead either way.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::Error;

/// Env var carrying the access key id (also the name injected into containers)
pub const ACCESS_KEY_ID_ENV: &str = "ACCESS_KEY_ID";
/// Env var carrying the secret access key (also the name injected into containers)
pub const SECRET_ACCESS_KEY_ENV: &str = "SECRET_ACCESS_KEY";

const PROFILE_SECTION: &str = "default";
const ACCESS_KEY_ID_KEY: &str = "aws_access_key_id";
const SECRET_ACCESS_KEY_KEY: &str = "aws_secret_access_key";

/// Access key pair for an S3-compatible store
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StoreCredentials {
    /// Access key id (empty when unresolved)
    pub access_key_id: String,
    /// Secret access key (empty when unresolved)
    pub secret_access_key: String,
}

impl std::fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

impl StoreCredentials {
    /// Resolve the key pair, never failing
    ///
    /// With a credentials file the file is authoritative: an unreadable file or a
    /// missing key is logged and yields empty keys. Without one, the process
    /// environment is used.
    pub fn resolve(creds_file: Option<&Path>) -> Self {
        match creds_file {
            Some(path) => Self::from_ini_file(path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to read store credentials file");
                Self::default()
            }),
            None => Self::from_env(),
        }
    }

    /// Read keys from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read keys through `lookup`; unset keys become empty strings
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let creds = Self {
            access_key_id: lookup(ACCESS_KEY_ID_ENV).unwrap_or_default(),
            secret_access_key: lookup(SECRET_ACCESS_KEY_ENV).unwrap_or_default(),
        };
        if !creds.is_complete() {
            debug!("store credentials not fully set in environment");
        }
        creds
    }

    /// Parse the `[default]` profile of an ini credentials file
    pub fn from_ini_file(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                "credentials",
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        Self::from_ini_str(&contents)
    }

    /// Parse the `[default]` profile from ini text
    pub fn from_ini_str(contents: &str) -> Result<Self, Error> {
        let sections = parse_ini(contents);
        let profile = sections.get(PROFILE_SECTION).ok_or_else(|| {
            Error::config("credentials", format!("no section: '{}'", PROFILE_SECTION))
        })?;

        let get = |key: &str| {
            profile.get(key).cloned().ok_or_else(|| {
                Error::config(
                    "credentials",
                    format!("no option '{}' in section: '{}'", key, PROFILE_SECTION),
                )
            })
        };

        Ok(Self {
            access_key_id: get(ACCESS_KEY_ID_KEY)?,
            secret_access_key: get(SECRET_ACCESS_KEY_KEY)?,
        })
    }

    /// True when both keys are non-empty
    pub fn is_complete(&self) -> bool {
        !self.access_key_id.is_empty() && !self.secret_access_key.is_empty()
    }
}

/// Minimal ini reader: `[section]` headers, `key = value` / `key: value`
/// pairs, `#` and `;` comments. Keys are case-insensitive like the AWS CLI's.
fn parse_ini(contents: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        let Some(section) = current.as_ref() else {
            continue;
        };
        let Some((key, value)) = line.split_once(['=', ':']) else {
            continue;
        };
        sections
            .entry(section.clone())
            .or_default()
            .insert(key.trim().to_lowercase(), value.trim().to_string());
    }

    sections
}
