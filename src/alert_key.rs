//! Alert instance identity
//!
//! An alert key names one alert instance as `name{k1=v1,k2=v2}`: the alert
//! name followed by the canonical tag group in braces. Empty braces mean an
//! ungrouped alert. Keys compare and sort as plain strings.

use crate::error::{Error, Result};
use crate::types::TagSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert key of the form `name{tags}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertKey(String);

/// Sortable list of alert keys
pub type AlertKeys = Vec<AlertKey>;

impl AlertKey {
    /// Build the canonical key for an alert name and group
    pub fn new(name: &str, group: &TagSet) -> Self {
        AlertKey(format!("{}{}", name, group))
    }

    /// Parse and validate a key
    ///
    /// Fails with `InvalidAlertKey` when the braces are missing and with
    /// `InvalidTags` when the group cannot be parsed.
    pub fn parse(s: &str) -> Result<Self> {
        let key = AlertKey(s.to_string());
        key.group()?;
        Ok(key)
    }

    /// Alert name (everything before the first `{`)
    pub fn name(&self) -> &str {
        match self.0.find('{') {
            Some(i) => &self.0[..i],
            None => &self.0,
        }
    }

    /// Tag group inside the braces
    pub fn group(&self) -> Result<TagSet> {
        let open = self
            .0
            .find('{')
            .ok_or_else(|| Error::InvalidAlertKey(self.0.clone()))?;
        let inner = self.0[open + 1..]
            .strip_suffix('}')
            .ok_or_else(|| Error::InvalidAlertKey(self.0.clone()))?;
        TagSet::parse(inner)
    }

    /// The raw key string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AlertKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AlertKey::parse(s)
    }
}
