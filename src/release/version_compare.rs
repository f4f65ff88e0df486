use std::cmp::Ordering;

/// Strip a leading `v`/`V` from a release tag: `v1.2.0` → `1.2.0`.
pub fn normalize_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix(['v', 'V']).unwrap_or(tag)
}

/// Compare dotted numeric versions component by component.
///
/// Missing components count as zero (`1.2` == `1.2.0`), as does any component
/// that is not a plain number. A leading `v` is ignored.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let seg_a = components(a);
    let seg_b = components(b);

    let max_len = seg_a.len().max(seg_b.len());
    for i in 0..max_len {
        let na = seg_a.get(i).copied().unwrap_or(0);
        let nb = seg_b.get(i).copied().unwrap_or(0);
        match na.cmp(&nb) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Whether `latest` is strictly newer than `current`.
pub fn is_newer(current: &str, latest: &str) -> bool {
    compare_versions(latest, current) == Ordering::Greater
}

fn components(version: &str) -> Vec<u64> {
    let version = normalize_tag(version);
    if version.is_empty() {
        return Vec::new();
    }
    version
        .split('.')
        .map(|part| part.trim().parse::<u64>().unwrap_or(0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_numeric_not_lexicographic() {
        assert_eq!(compare_versions("1.2.0", "1.10.0"), Ordering::Less);
        assert_eq!(compare_versions("1.10.0", "1.9.9"), Ordering::Greater);
    }

    #[test]
    fn test_missing_components_are_zero() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("2", "1.99.99"), Ordering::Greater);
        assert_eq!(compare_versions("", "0.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_non_numeric_components_are_zero() {
        assert_eq!(compare_versions("1.x.3", "1.0.3"), Ordering::Equal);
        assert_eq!(compare_versions("1.0.0-beta", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0.1", "1.0.0-rc1"), Ordering::Greater);
    }

    #[test]
    fn test_leading_v_ignored() {
        assert_eq!(compare_versions("v1.2.0", "1.2.0"), Ordering::Equal);
        assert_eq!(normalize_tag("v1.0.1"), "1.0.1");
        assert_eq!(normalize_tag(" V2 "), "2");
        assert_eq!(normalize_tag("1.0"), "1.0");
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("1.0.0", "1.0.1"));
        assert!(is_newer("1.0.0", "v2.0"));
        assert!(!is_newer("1.0.0", "1.0.0"));
        assert!(!is_newer("2.0.0", "1.9.0"));
    }

    fn version() -> impl Strategy<Value = String> {
        prop::collection::vec(0u64..1000, 1..5)
            .prop_map(|parts| parts.iter().map(u64::to_string).collect::<Vec<_>>().join("."))
    }

    proptest! {
        #[test]
        fn prop_reflexive(a in version()) {
            prop_assert_eq!(compare_versions(&a, &a), Ordering::Equal);
        }

        #[test]
        fn prop_antisymmetric(a in version(), b in version()) {
            prop_assert_eq!(compare_versions(&a, &b), compare_versions(&b, &a).reverse());
        }

        #[test]
        fn prop_trailing_zero_is_equal(a in version()) {
            let padded = format!("{a}.0");
            prop_assert_eq!(compare_versions(&a, &padded), Ordering::Equal);
        }

        #[test]
        fn prop_transitive(a in version(), b in version(), c in version()) {
            if compare_versions(&a, &b) != Ordering::Greater
                && compare_versions(&b, &c) != Ordering::Greater
            {
                prop_assert_ne!(compare_versions(&a, &c), Ordering::Greater);
            }
        }

        #[test]
        fn prop_bumping_last_component_is_newer(parts in prop::collection::vec(0u64..1000, 1..5)) {
            let current = parts.iter().map(u64::to_string).collect::<Vec<_>>().join(".");
            let mut bumped = parts.clone();
            if let Some(last) = bumped.last_mut() {
                *last += 1;
            }
            let latest = bumped.iter().map(u64::to_string).collect::<Vec<_>>().join(".");
            prop_assert!(is_newer(&current, &latest));
        }
    }
}
