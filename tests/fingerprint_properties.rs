//! Property tests for the universal fingerprint/diff invariants.

use indexmap::IndexMap;
use proptest::prelude::*;
use reconnoiter::diff::DiffDetector;
use reconnoiter::fingerprint::FingerprintBuilder;
use reconnoiter::report::{Severity, StageResult};

fn results_with_ipv4(addresses: Vec<String>) -> IndexMap<String, StageResult> {
    let mut results = IndexMap::new();
    let mut dns = StageResult::ok(std::collections::BTreeMap::new());
    dns.fields.insert("ipv4".to_string(), serde_json::json!(addresses));
    results.insert("dns".to_string(), dns);
    results
}

proptest! {
    /// For any set-valued fingerprint field, the built list is sorted and
    /// has no duplicates, regardless of the input's order or repeats.
    #[test]
    fn ipv4_field_is_sorted_and_deduplicated(
        mut addresses in prop::collection::vec("([0-9]{1,3}\\.){3}[0-9]{1,3}", 0..20)
    ) {
        let results = results_with_ipv4(addresses.clone());
        let fingerprint = FingerprintBuilder::build(&results);

        addresses.sort();
        addresses.dedup();
        prop_assert_eq!(&fingerprint.infrastructure.ipv4, &addresses);
    }

    /// Diffing a fingerprint against itself always yields zero changes and
    /// every category null.
    #[test]
    fn self_diff_has_zero_changes(addresses in prop::collection::vec("([0-9]{1,3}\\.){3}[0-9]{1,3}", 0..10)) {
        let results = results_with_ipv4(addresses);
        let fingerprint = FingerprintBuilder::build(&results);

        let diff = DiffDetector::diff("a", "b", Some(&fingerprint), &fingerprint);
        prop_assert_eq!(diff.summary.total_changes, 0);
        prop_assert!(diff.changes.values().all(Option::is_none));
    }
}

#[test]
fn missing_previous_fingerprint_never_panics_and_yields_nulls() {
    let results = results_with_ipv4(vec!["10.0.0.1".to_string()]);
    let current = FingerprintBuilder::build(&results);
    let diff = DiffDetector::diff("a", "b", None, &current);
    assert!(diff.changes.values().all(Option::is_none));
    assert_eq!(diff.summary.severity, Severity::Low);
}
