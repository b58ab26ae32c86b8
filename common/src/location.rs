use crate::PrefixedId;

/// Whether a notification belongs to this instance's shard.
///
/// An instance without configured locations handles everything; otherwise one
/// of the related identifiers must end with a configured location tag.
#[must_use]
pub fn in_scope(related: &[PrefixedId], locations: &[String]) -> bool {
    locations.is_empty()
        || related
            .iter()
            .any(|id| locations.iter().any(|loc| id.as_str().ends_with(loc.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<PrefixedId> {
        raw.iter().map(|i| PrefixedId::parse(i).unwrap()).collect()
    }

    #[test]
    fn test_unscoped_instance_accepts_everything() {
        assert!(in_scope(&[], &[]));
        assert!(in_scope(&ids(&["loadbal-abc"]), &[]));
    }

    #[test]
    fn test_matches_location_suffix() {
        let locations = vec!["lctnloc-dc1".to_string(), "lctnloc-dc2".to_string()];
        assert!(in_scope(&ids(&["loadbal-abc", "lctnloc-dc2"]), &locations));
        assert!(!in_scope(&ids(&["loadbal-abc", "lctnloc-dc3"]), &locations));
    }

    #[test]
    fn test_scoped_instance_rejects_empty_related() {
        assert!(!in_scope(&[], &["dc1".to_string()]));
    }
}
