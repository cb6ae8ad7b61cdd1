//! Property-based coverage of the canonicalization laws (mapping/set order
//! independence, sequence order sensitivity, determinism), exercised with
//! arbitrary inputs rather than fixed examples.

use memocache::canon_bytes;
use proptest::collection::{hash_map, hash_set, vec as prop_vec};
use proptest::prelude::*;

proptest! {
    #[test]
    fn mapping_order_independence(
        entries in hash_map(any::<i64>(), any::<i64>(), 0..16)
    ) {
        use std::collections::BTreeMap;
        let shuffled: BTreeMap<i64, i64> = entries.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(canon_bytes(&entries), canon_bytes(&shuffled));
    }

    #[test]
    fn set_order_independence(values in hash_set(any::<i32>(), 0..16)) {
        use std::collections::BTreeSet;
        let reordered: BTreeSet<i32> = values.iter().copied().collect();
        prop_assert_eq!(canon_bytes(&values), canon_bytes(&reordered));
    }

    #[test]
    fn sequence_order_sensitivity(values in prop_vec(any::<i64>(), 2..16)) {
        let mut reversed = values.clone();
        reversed.reverse();
        if values != reversed {
            prop_assert_ne!(canon_bytes(&values), canon_bytes(&reversed));
        }
    }

    #[test]
    fn determinism(values in prop_vec(any::<i64>(), 0..32), text in ".*") {
        let value = (values, text);
        prop_assert_eq!(canon_bytes(&value), canon_bytes(&value));
    }
}
