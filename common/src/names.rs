use crate::{Error, PrefixedId, Result};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use regex::Regex;

lazy_static::lazy_static! {
    static ref DNS_LABEL: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap();
}

pub const RELEASE_PREFIX: &str = "lb-";
/// Kubernetes label values share the DNS label ceiling.
pub const LABEL_VALUE_MAX: usize = 63;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NameLimits {
    pub namespace: usize,
    pub release: usize,
}

impl Default for NameLimits {
    fn default() -> Self {
        Self {
            namespace: 63,
            release: 53,
        }
    }
}

/// Cluster object names owned by one load balancer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseNames {
    pub namespace: String,
    pub release: String,
    /// URL-safe base64 of the load balancer id, used as a label value
    pub encoded_id: String,
}

#[must_use]
pub fn hash_name(name: &str) -> String {
    sha256::digest(name)
}

#[must_use]
pub fn encode_id(id: &PrefixedId) -> String {
    URL_SAFE_NO_PAD.encode(id.as_str())
}

fn truncate(mut name: String, max: usize) -> String {
    // hex and the release prefix are ascii, byte truncation is safe
    name.truncate(max);
    name
}

fn check_label(kind: &str, name: &str, max: usize) -> Result<()> {
    if name.is_empty() || name.len() > max {
        return Err(Error::InvalidName(format!(
            "{kind} {name:?} must be between 1 and {max} characters"
        )));
    }
    if !DNS_LABEL.is_match(name) {
        return Err(Error::InvalidName(format!("{kind} {name:?} is not a valid DNS label")));
    }
    Ok(())
}

/// Derive the namespace and release names for a load balancer.
///
/// The result only depends on the id and the limits, so every replica of the
/// operator agrees on the names.
pub fn derive_names(id: &PrefixedId, limits: NameLimits) -> Result<ReleaseNames> {
    if limits.namespace == 0 || limits.release <= RELEASE_PREFIX.len() {
        return Err(Error::InvalidName(format!(
            "name limits too small: namespace={}, release={}",
            limits.namespace, limits.release
        )));
    }
    let hash = hash_name(id.as_str());
    let namespace = truncate(hash.clone(), limits.namespace);
    let release = truncate(format!("{RELEASE_PREFIX}{hash}"), limits.release);
    let encoded_id = encode_id(id);
    check_label("namespace", &namespace, limits.namespace)?;
    check_label("release", &release, limits.release)?;
    if encoded_id.is_empty() || encoded_id.len() > LABEL_VALUE_MAX {
        return Err(Error::InvalidName(format!(
            "encoded id for {id} must be between 1 and {LABEL_VALUE_MAX} characters"
        )));
    }
    Ok(ReleaseNames {
        namespace,
        release,
        encoded_id,
    })
}
