use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static::lazy_static! {
    static ref PREFIXED_ID: Regex = Regex::new(r"^([a-z0-9]+)-([A-Za-z0-9_-]+)$").unwrap();
}

/// An opaque identifier of the form `<prefix>-<suffix>`.
///
/// The prefix names the kind of object the identifier refers to (`loadbal`
/// for load balancers, `loadprt` for ports, `lctnloc` for locations...).
#[derive(Serialize, Deserialize, Eq, PartialEq, Hash, Clone, Debug, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct PrefixedId(String);

impl PrefixedId {
    pub fn parse(id: &str) -> Result<Self> {
        if PREFIXED_ID.is_match(id) {
            Ok(Self(id.to_string()))
        } else {
            Err(Error::InvalidIdentifier(id.to_string()))
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        self.0.split_once('-').map(|(p, _)| p).unwrap_or_default()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.prefix() == prefix
    }
}

impl TryFrom<String> for PrefixedId {
    type Error = Error;

    fn try_from(id: String) -> Result<Self> {
        Self::parse(&id)
    }
}

impl From<PrefixedId> for String {
    fn from(id: PrefixedId) -> String {
        id.0
    }
}

impl fmt::Display for PrefixedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
