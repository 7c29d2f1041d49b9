use std::cmp::Reverse;

use super::models::{MatchResult, RankedList};

/// Orders results by score, highest first. Equal scores keep upload order,
/// so the order in which workers finished never shows through.
pub fn rank(mut results: Vec<MatchResult>) -> RankedList {
    results.sort_by_key(|result| (Reverse(result.score), result.candidate.upload_index));
    RankedList { entries: results }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::core::models::CandidateRef;

    fn result(upload_index: usize, score: u8) -> MatchResult {
        MatchResult {
            candidate: CandidateRef {
                file_name: format!("cv-{upload_index}.pdf"),
                upload_index,
                name: format!("Candidate {upload_index}"),
            },
            score,
            justification: "ok".to_string(),
        }
    }

    #[test]
    fn most_suitable_is_first_and_others_follow() {
        let ranked = rank(vec![result(0, 40), result(1, 85), result(2, 70)]);

        assert_eq!(ranked.most_suitable().map(|r| r.candidate.upload_index), Some(1));
        let others: Vec<usize> = ranked.others().iter().map(|r| r.candidate.upload_index).collect();
        assert_eq!(others, vec![2, 0]);
    }

    #[test]
    fn empty_and_single_entry_lists() {
        let empty = rank(Vec::new());
        assert!(empty.is_empty());
        assert!(empty.most_suitable().is_none());
        assert!(empty.others().is_empty());

        let single = rank(vec![result(0, 10)]);
        assert_eq!(single.len(), 1);
        assert!(single.others().is_empty());
    }

    proptest! {
        #[test]
        fn completion_order_never_changes_the_ranking(
            (in_upload_order, shuffled) in prop::collection::vec(0_u8..=100, 1..12)
                .prop_flat_map(|scores| {
                    let results: Vec<MatchResult> =
                        scores.iter().enumerate().map(|(i, s)| result(i, *s)).collect();
                    (Just(results.clone()), Just(results).prop_shuffle())
                }),
        ) {
            let expected = rank(in_upload_order);
            let ranked = rank(shuffled);
            prop_assert_eq!(&ranked, &expected);

            for pair in ranked.entries.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                prop_assert!(a.score >= b.score);
                if a.score == b.score {
                    prop_assert!(a.candidate.upload_index < b.candidate.upload_index);
                }
            }
        }

        #[test]
        fn distinct_scores_are_strictly_descending(
            scores in prop::collection::btree_set(0_u8..=100, 1..20),
        ) {
            let results: Vec<MatchResult> =
                scores.iter().enumerate().map(|(i, s)| result(i, *s)).collect();
            let ranked = rank(results);

            for pair in ranked.entries.windows(2) {
                prop_assert!(pair[0].score > pair[1].score);
            }
            prop_assert_eq!(ranked.len(), scores.len());
        }
    }
}
