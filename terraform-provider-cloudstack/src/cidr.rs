//! CIDR list reconciliation
//!
//! CloudStack reports the CIDRs of a firewall or ACL rule as a single
//! comma-separated string, while Terraform holds them as an unordered set.
//! These helpers bring both shapes into the same sorted form so a refresh
//! only reports drift when the membership actually differs.
//!
//! Entries are opaque strings: no CIDR syntax checks happen here.

use std::collections::HashSet;

/// Normalize a remote `cidrlist` value into a sorted list of trimmed,
/// non-empty entries.
pub fn normalize_remote(input: &str) -> Vec<String> {
    let mut cidrs: Vec<String> = input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    cidrs.sort();
    cidrs
}

/// Normalize a locally configured CIDR set. An absent set is treated the
/// same as an empty one.
pub fn normalize_local(input: Option<&HashSet<String>>) -> Vec<String> {
    let Some(set) = input else {
        return Vec::new();
    };

    let mut cidrs: Vec<String> = set
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    cidrs.sort();
    cidrs
}

/// Whether the remote CIDR string and the local set describe the same CIDRs,
/// ignoring order, surrounding whitespace and empty segments.
pub fn sets_equal(remote: &str, local: Option<&HashSet<String>>) -> bool {
    normalize_remote(remote) == normalize_local(local)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_remote_trims_and_sorts() {
        assert_eq!(
            normalize_remote(" 192.168.1.0/24 , 10.0.0.0/8 "),
            vec!["10.0.0.0/8", "192.168.1.0/24"]
        );
    }

    #[test]
    fn test_normalize_remote_drops_empty_segments() {
        assert_eq!(
            normalize_remote("10.0.0.0/8,,192.168.1.0/24,"),
            vec!["10.0.0.0/8", "192.168.1.0/24"]
        );
        assert!(normalize_remote("").is_empty());
        assert!(normalize_remote(" , ,, ").is_empty());
    }

    #[test]
    fn test_normalize_remote_keeps_duplicates() {
        assert_eq!(
            normalize_remote("10.0.0.0/8,10.0.0.0/8"),
            vec!["10.0.0.0/8", "10.0.0.0/8"]
        );
    }

    #[test]
    fn test_normalize_local() {
        assert!(normalize_local(None).is_empty());
        assert!(normalize_local(Some(&HashSet::new())).is_empty());
        assert!(normalize_local(Some(&set(&["", "   "]))).is_empty());
        assert_eq!(
            normalize_local(Some(&set(&["10.0.0.0/8", "", "192.168.1.0/24"]))),
            vec!["10.0.0.0/8", "192.168.1.0/24"]
        );
        assert_eq!(
            normalize_local(Some(&set(&[" 172.16.0.0/12 ", "0.0.0.0/0"]))),
            vec!["0.0.0.0/0", "172.16.0.0/12"]
        );
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let once = normalize_remote("192.168.1.0/24, 10.0.0.0/8,");
        let twice = normalize_remote(&once.join(","));
        assert_eq!(once, twice);

        let local = normalize_local(Some(&set(&[" 10.0.0.0/8", "192.168.1.0/24 "])));
        let again: HashSet<String> = local.iter().cloned().collect();
        assert_eq!(local, normalize_local(Some(&again)));
    }

    #[test]
    fn test_sets_equal_ignores_order_and_whitespace() {
        assert!(sets_equal(
            "10.0.0.0/8,192.168.1.0/24",
            Some(&set(&["192.168.1.0/24", "10.0.0.0/8"]))
        ));
        assert!(sets_equal(
            "10.0.0.0/8, 192.168.1.0/24",
            Some(&set(&["10.0.0.0/8", "192.168.1.0/24"]))
        ));
    }

    #[test]
    fn test_sets_equal_detects_membership_changes() {
        assert!(!sets_equal(
            "10.0.0.0/8,192.168.1.0/24",
            Some(&set(&["10.0.0.0/8"]))
        ));
        assert!(!sets_equal("10.0.0.0/8", Some(&set(&["172.16.0.0/12"]))));
        assert!(!sets_equal("10.0.0.0/8,10.0.0.0/8", Some(&set(&["10.0.0.0/8"]))));
    }

    #[test]
    fn test_sets_equal_empty_cases() {
        assert!(sets_equal("", Some(&HashSet::new())));
        assert!(sets_equal("", None));
        assert!(sets_equal(" , ", Some(&set(&[""]))));
        assert!(!sets_equal("10.0.0.0/8", Some(&HashSet::new())));
        assert!(!sets_equal("10.0.0.0/8", None));
        assert!(!sets_equal("", Some(&set(&["10.0.0.0/8"]))));
    }
}
