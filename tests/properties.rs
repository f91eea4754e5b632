use proptest::prelude::*;
use std::collections::HashSet;

use htm_anomaly::core::{
    anomaly::{raw_anomaly_score, AnomalyMode, AnomalyParams, AnomalyScorer},
    column::ColumnSet,
    topology::Topology,
};

fn column_set() -> impl Strategy<Value = ColumnSet> {
    proptest::collection::vec(0usize..200, 0..60).prop_map(ColumnSet::from_sparse)
}

mod raw_score {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_raw_score_is_a_fraction(active in column_set(), predicted in column_set()) {
            let raw = raw_anomaly_score(&active, &predicted);
            prop_assert!((0.0..=1.0).contains(&raw));
        }

        #[test]
        fn prop_zero_iff_everything_was_predicted(active in column_set(), predicted in column_set()) {
            let raw = raw_anomaly_score(&active, &predicted);
            let all_predicted = active.iter().all(|col| predicted.contains(col));
            prop_assert_eq!(raw == 0.0, all_predicted);
        }

        #[test]
        fn prop_one_iff_nothing_was_predicted(active in column_set(), predicted in column_set()) {
            prop_assume!(!active.is_empty());
            let raw = raw_anomaly_score(&active, &predicted);
            prop_assert_eq!(raw == 1.0, active.overlap(&predicted) == 0);
        }
    }
}

mod column_sets {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_sparse_sets_are_sorted_and_unique(indices in proptest::collection::vec(0usize..500, 0..100)) {
            let set = ColumnSet::from_sparse(indices.clone());
            let expected: HashSet<usize> = indices.into_iter().collect();

            prop_assert!(set.as_slice().windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(set.len(), expected.len());
            prop_assert!(set.iter().all(|col| expected.contains(&col)));
        }

        #[test]
        fn prop_overlap_equals_set_intersection(a in column_set(), b in column_set()) {
            let set_a: HashSet<usize> = a.iter().collect();
            let set_b: HashSet<usize> = b.iter().collect();

            prop_assert_eq!(a.overlap(&b), set_a.intersection(&set_b).count());
            prop_assert_eq!(a.overlap(&b), b.overlap(&a));
        }

        #[test]
        fn prop_dense_form_preserves_membership(set in column_set()) {
            prop_assert_eq!(ColumnSet::from_dense(&set.to_dense(200)), set);
        }
    }
}

mod likelihood {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_likelihood_is_monotone_after_warm_up(
            history in proptest::collection::vec(0.0f32..=1.0, 20..80),
            a in 0.0f32..=1.0,
            b in 0.0f32..=1.0,
        ) {
            let mut scorer = AnomalyScorer::new(AnomalyParams {
                mode: AnomalyMode::Likelihood,
                warm_up: 20,
                statistics_window: 100,
                ..Default::default()
            })
            .unwrap();
            for raw in history {
                scorer.record(raw);
            }

            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let (l_low, l_high) = (scorer.likelihood_of(low), scorer.likelihood_of(high));

            prop_assert!((0.0..=1.0).contains(&l_low));
            prop_assert!((0.0..=1.0).contains(&l_high));
            prop_assert!(l_low <= l_high);
        }

        #[test]
        fn prop_likelihood_is_neutral_during_warm_up(
            history in proptest::collection::vec(0.0f32..=1.0, 0..20),
            raw in 0.0f32..=1.0,
        ) {
            let mut scorer = AnomalyScorer::new(AnomalyParams {
                warm_up: 20,
                statistics_window: 100,
                ..Default::default()
            })
            .unwrap();
            let seen = history.len();
            for past in history {
                prop_assert_eq!(scorer.record(past).likelihood, Some(0.5));
            }

            let next = scorer.record(raw).likelihood;
            if seen + 1 < 20 {
                prop_assert_eq!(next, Some(0.5));
            } else {
                prop_assert!(scorer.is_warmed_up());
                prop_assert_eq!(next, Some(scorer.likelihood_of(raw)));
            }
        }
    }
}

mod topology {
    use super::*;

    proptest! {
        #[test]
        fn prop_neighborhoods_are_in_range_and_unique(
            dims in proptest::collection::vec(1usize..12, 1..4),
            center_seed in any::<usize>(),
            radius in 0usize..6,
            wrapping in any::<bool>(),
        ) {
            let topology = Topology::new(&dims);
            let center = center_seed % topology.num_elements();
            let hood = topology.neighborhood(center, radius, wrapping);
            let expected = hood.size_hint().0;
            let indices: Vec<usize> = hood.collect();
            let unique: HashSet<usize> = indices.iter().copied().collect();

            prop_assert_eq!(indices.len(), expected);
            prop_assert_eq!(unique.len(), indices.len());
            prop_assert!(indices.iter().all(|&i| i < topology.num_elements()));
            prop_assert!(unique.contains(&center));
            prop_assert!(indices.len() <= topology.max_neighborhood_size(radius));
        }
    }
}
