// Rank assigner: total ordering of brands inside one bucket.
//
// Every metric is ranked with the same tie-break chain, so ranks are always a
// permutation of 1..=N whatever order the input arrived in:
//   metric -> more appearances -> higher share of voice -> brand name ascending

use crate::types::{AggregatedMetricSet, BrandMetricSummary};
use std::cmp::Ordering;

fn tie_break(a: &BrandMetricSummary, b: &BrandMetricSummary) -> Ordering {
    b.total_appearances
        .cmp(&a.total_appearances)
        .then_with(|| b.share_of_voice.total_cmp(&a.share_of_voice))
        .then_with(|| a.brand.cmp(&b.brand))
}

fn by_visibility(a: &BrandMetricSummary, b: &BrandMetricSummary) -> Ordering {
    b.visibility_score
        .total_cmp(&a.visibility_score)
        .then_with(|| tie_break(a, b))
}

/// Lower average position is better; never-positioned brands (0) go last.
fn by_avg_position(a: &BrandMetricSummary, b: &BrandMetricSummary) -> Ordering {
    let placed = |s: &BrandMetricSummary| s.avg_position > 0.0;
    placed(b)
        .cmp(&placed(a))
        .then_with(|| a.avg_position.total_cmp(&b.avg_position))
        .then_with(|| tie_break(a, b))
}

fn by_word_count(a: &BrandMetricSummary, b: &BrandMetricSummary) -> Ordering {
    b.word_count.cmp(&a.word_count).then_with(|| tie_break(a, b))
}

fn by_depth(a: &BrandMetricSummary, b: &BrandMetricSummary) -> Ordering {
    b.depth_of_mention
        .total_cmp(&a.depth_of_mention)
        .then_with(|| tie_break(a, b))
}

/// 1-based rank of every row under `cmp`, indexed like `rows`.
fn ranks_by<F>(rows: &[BrandMetricSummary], cmp: F) -> Vec<u32>
where
    F: Fn(&BrandMetricSummary, &BrandMetricSummary) -> Ordering,
{
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&i, &j| cmp(&rows[i], &rows[j]));
    let mut ranks = vec![0u32; rows.len()];
    for (position, idx) in order.into_iter().enumerate() {
        ranks[idx] = position as u32 + 1;
    }
    ranks
}

/// Fill every rank field and the rank change against `previous`, then return the
/// rows ordered by visibility rank.
///
/// `rank_change` is previous rank minus new rank (positive = moved up). It stays
/// `None` when there is no prior snapshot or the brand was not in it.
pub fn assign_ranks(
    mut rows: Vec<BrandMetricSummary>,
    previous: Option<&AggregatedMetricSet>,
) -> Vec<BrandMetricSummary> {
    let visibility = ranks_by(&rows, by_visibility);
    let position = ranks_by(&rows, by_avg_position);
    let words = ranks_by(&rows, by_word_count);
    let depth = ranks_by(&rows, by_depth);

    for (i, row) in rows.iter_mut().enumerate() {
        row.visibility_rank = visibility[i];
        row.avg_position_rank = position[i];
        row.word_count_rank = words[i];
        row.depth_of_mention_rank = depth[i];
        row.rank_change = previous
            .and_then(|set| set.brand(&row.brand))
            .filter(|prior| prior.visibility_rank > 0)
            .map(|prior| prior.visibility_rank as i32 - row.visibility_rank as i32);
    }

    rows.sort_by_key(|r| r.visibility_rank);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DateRange, Scope};
    use chrono::{TimeZone, Utc};

    fn row(brand: &str, score: f64, appearances: u32, sov: f64) -> BrandMetricSummary {
        BrandMetricSummary {
            brand: brand.to_string(),
            is_owner: false,
            visibility_score: score,
            visibility_rank: 0,
            rank_change: None,
            share_of_voice: sov,
            avg_position: 0.0,
            avg_position_rank: 0,
            word_count: 0,
            word_count_rank: 0,
            depth_of_mention: 0.0,
            depth_of_mention_rank: 0,
            first_place_count: 0,
            second_place_count: 0,
            third_place_count: 0,
            total_appearances: appearances,
        }
    }

    fn previous_with(ranks: &[(&str, u32)]) -> AggregatedMetricSet {
        let ts = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        AggregatedMetricSet {
            user_id: "u1".into(),
            run_id: "r1".into(),
            scope: Scope::Overall,
            scope_value: "all".into(),
            date_range: DateRange::new(ts, ts).unwrap(),
            total_prompts: 3,
            total_brands: ranks.len(),
            brands: ranks
                .iter()
                .map(|(b, r)| {
                    let mut x = row(b, 0.0, 0, 0.0);
                    x.visibility_rank = *r;
                    x
                })
                .collect(),
            last_calculated: ts,
        }
    }

    #[test]
    fn orders_by_score_descending() {
        let ranked = assign_ranks(vec![row("B", 50.0, 1, 33.3), row("A", 80.0, 2, 66.7)], None);
        assert_eq!(ranked[0].brand, "A");
        assert_eq!(ranked[0].visibility_rank, 1);
        assert_eq!(ranked[1].visibility_rank, 2);
        assert!(ranked.iter().all(|r| r.rank_change.is_none()));
    }

    #[test]
    fn tie_breaks_apply_in_order() {
        let ranked = assign_ranks(
            vec![
                row("Delta", 70.0, 2, 40.0),
                row("Charlie", 70.0, 2, 40.0),
                row("Bravo", 70.0, 2, 50.0),
                row("Alpha", 70.0, 1, 90.0),
            ],
            None,
        );
        let names: Vec<&str> = ranked.iter().map(|r| r.brand.as_str()).collect();
        assert_eq!(names, vec!["Bravo", "Charlie", "Delta", "Alpha"]);
    }

    #[test]
    fn ranks_are_a_permutation_regardless_of_input_order() {
        let rows = vec![
            row("A", 10.0, 1, 10.0),
            row("B", 10.0, 1, 10.0),
            row("C", 0.0, 0, 0.0),
            row("D", 0.0, 0, 0.0),
        ];
        let mut reversed = rows.clone();
        reversed.reverse();
        let a = assign_ranks(rows, None);
        let b = assign_ranks(reversed, None);
        assert_eq!(a, b);
        let mut ranks: Vec<u32> = a.iter().map(|r| r.visibility_rank).collect();
        ranks.sort();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
    }

    #[test]
    fn avg_position_lower_is_better_unplaced_last() {
        let mut a = row("A", 0.0, 0, 0.0);
        a.avg_position = 0.0;
        let mut b = row("B", 0.0, 0, 0.0);
        b.avg_position = 2.5;
        let mut c = row("C", 0.0, 0, 0.0);
        c.avg_position = 1.2;
        let ranked = assign_ranks(vec![a, b, c], None);
        let get = |name: &str| ranked.iter().find(|r| r.brand == name).unwrap().avg_position_rank;
        assert_eq!((get("C"), get("B"), get("A")), (1, 2, 3));
    }

    #[test]
    fn rank_change_is_previous_minus_new() {
        let prev = previous_with(&[("A", 2), ("B", 1)]);
        let ranked = assign_ranks(
            vec![row("A", 90.0, 2, 60.0), row("B", 40.0, 1, 30.0), row("New", 10.0, 1, 10.0)],
            Some(&prev),
        );
        let change = |name: &str| ranked.iter().find(|r| r.brand == name).unwrap().rank_change;
        assert_eq!(change("A"), Some(1));
        assert_eq!(change("B"), Some(-1));
        assert_eq!(change("New"), None);
    }
}
