//! Sequence reconciliation tests.
//!
//! The contract under test: replaying a diff on `from` reproduces `to`, and
//! `mapping` accounts for every position of both sequences exactly once.

#[cfg(test)]
mod tests {
    use crate::reconcile::{apply, reconcile, reconcile_eq, Diff, Mapping};
    use crate::value::Value;
    use proptest::prelude::*;
    use serde_json::json;

    fn assert_mapping_partition<T>(diff: &Diff<T>, from_len: usize, to_len: usize) {
        let mut from_seen = vec![0; from_len];
        let mut to_seen = vec![0; to_len];
        for entry in &diff.mapping {
            if let Some(f) = entry.from_index() {
                from_seen[f] += 1;
            }
            if let Some(t) = entry.to_index() {
                to_seen[t] += 1;
            }
        }
        assert!(from_seen.iter().all(|&n| n == 1), "from indices: {:?}", from_seen);
        assert!(to_seen.iter().all(|&n| n == 1), "to indices: {:?}", to_seen);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // FIXED SCENARIOS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_shift_left_removes_head_and_appends() {
        let diff = reconcile_eq(&["a", "b", "c"], &["b", "c", "d"]);

        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].item, "a");
        assert_eq!(diff.removed[0].from_index, 0);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].item, "d");
        assert_eq!(diff.added[0].to_index, 2);
        assert!(diff.moved.is_empty());
        assert_eq!(apply(&["a", "b", "c"], &diff), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_swap_is_a_single_move() {
        let diff = reconcile_eq(&["a", "b"], &["b", "a"]);

        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert_eq!(diff.moved.len(), 1);
        let moved = &diff.moved[0];
        assert_eq!(moved.item, "b");
        assert_eq!(moved.from_index, Some(1));
        assert_eq!((moved.move_from, moved.insert_at), (1, 0));
        assert_eq!(apply(&["a", "b"], &diff), vec!["b", "a"]);
    }

    #[test]
    fn test_identical_sequences_are_stable() {
        let items = ["x", "y", "z", "y"];
        let diff = reconcile_eq(&items, &items);

        assert!(diff.is_empty());
        assert!(diff.index_changed.is_empty());
        assert!(diff
            .mapping
            .iter()
            .all(|m| matches!(m, Mapping::Unchanged { from_index, to_index, .. } if from_index == to_index)));
    }

    #[test]
    fn test_empty_inputs() {
        let empty: [i32; 0] = [];

        let diff = reconcile_eq(&empty, &empty);
        assert!(diff.is_empty());
        assert!(diff.mapping.is_empty());

        let diff = reconcile_eq(&empty, &[1, 2]);
        assert_eq!(diff.added.len(), 2);
        assert_eq!(apply(&empty, &diff), vec![1, 2]);

        let diff = reconcile_eq(&[1, 2], &empty);
        assert_eq!(diff.removed.len(), 2);
        // Back to front.
        assert_eq!(diff.removed[0].from_index, 1);
        assert!(apply(&[1, 2], &diff).is_empty());
    }

    #[test]
    fn test_full_reversal() {
        let from = [1, 2, 3, 4, 5];
        let to = [5, 4, 3, 2, 1];
        let diff = reconcile_eq(&from, &to);

        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert!(!diff.moved.is_empty());
        assert_eq!(apply(&from, &diff), to.to_vec());
        assert_mapping_partition(&diff, from.len(), to.len());
    }

    #[test]
    fn test_all_same_values() {
        let diff = reconcile_eq(&[7, 7, 7], &[7, 7]);
        assert_eq!(diff.removed.len(), 1);
        assert!(diff.added.is_empty());
        assert_eq!(apply(&[7, 7, 7], &diff), vec![7, 7]);
    }

    #[test]
    fn test_repeated_values() {
        let from = ["a", "b", "a"];
        let to = ["b", "a"];
        let diff = reconcile_eq(&from, &to);

        assert_eq!(apply(&from, &diff), to.to_vec());
        assert_mapping_partition(&diff, from.len(), to.len());
        assert_eq!(diff.removed.len(), 1);
    }

    #[test]
    fn test_index_changed_tracks_shifted_entries() {
        let diff = reconcile_eq(&["a", "b", "c"], &["b", "c"]);
        let shifted: Vec<_> = diff
            .index_changed
            .iter()
            .map(|c| (c.item, c.from_index, c.to_index))
            .collect();
        assert_eq!(shifted, vec![("b", 1, 0), ("c", 2, 1)]);
    }

    #[test]
    fn test_custom_predicate_by_identity() {
        let a = Value::from(json!({"id": 1}));
        let b = Value::from(json!({"id": 2}));
        let a_copy = Value::from(json!({"id": 1}));

        let diff = reconcile(
            &[a.clone(), b.clone()],
            &[b.clone(), a_copy.clone()],
            Value::is_same,
        );
        // A structurally equal copy is a different item under identity.
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.added.len(), 1);

        let diff = reconcile(&[a, b.clone()], &[b, a_copy], Value::deep_equals);
        assert!(diff.added.is_empty());
        assert_eq!(diff.moved.len(), 1);
    }

    #[test]
    fn test_diff_serializes_with_camel_case() {
        let diff = reconcile_eq(&["a"], &["b"]);
        let json = serde_json::to_value(&diff).unwrap();
        assert_eq!(json["added"][0]["toIndex"], 0);
        assert_eq!(json["removed"][0]["fromIndex"], 0);
        assert_eq!(json["mapping"][0]["kind"], "new");
        assert_eq!(json["mapping"][1]["kind"], "removed");
    }

    #[test]
    fn test_replay_clamps_out_of_range_positions() {
        let diff = reconcile_eq(&[1, 2, 3], &[3]);
        let mut shorter = vec![10];
        diff.replay(&mut shorter, |added| added.item);
        assert!(shorter.len() <= 1);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // PROPERTIES
    // ═══════════════════════════════════════════════════════════════════════════════

    proptest! {
        #[test]
        fn prop_replay_reproduces_target(
            from in prop::collection::vec(0u8..4, 0..10),
            to in prop::collection::vec(0u8..4, 0..10),
        ) {
            let diff = reconcile_eq(&from, &to);
            prop_assert_eq!(apply(&from, &diff), to);
        }

        #[test]
        fn prop_mapping_is_a_partition(
            from in prop::collection::vec(0u8..5, 0..10),
            to in prop::collection::vec(0u8..5, 0..10),
        ) {
            let diff = reconcile_eq(&from, &to);
            let mut from_seen = vec![0; from.len()];
            let mut to_seen = vec![0; to.len()];
            for entry in &diff.mapping {
                if let Some(f) = entry.from_index() {
                    from_seen[f] += 1;
                }
                if let Some(t) = entry.to_index() {
                    to_seen[t] += 1;
                }
            }
            prop_assert!(from_seen.iter().all(|&n| n == 1));
            prop_assert!(to_seen.iter().all(|&n| n == 1));
        }

        #[test]
        fn prop_identical_sequences_produce_no_operations(
            items in prop::collection::vec(0u8..3, 0..12),
        ) {
            prop_assert!(reconcile_eq(&items, &items).is_empty());
        }
    }
}
