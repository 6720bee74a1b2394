//! Metrics aggregation against the JSON fixture and the worked scenarios:
//! partition -> per-brand summaries -> ranks, without touching a store.

use brandscope::engine::compute_sets;
use brandscope::metrics::{summarize_bucket, BrandUniverse};
use brandscope::partition::partition;
use brandscope::ranking::assign_ranks;
use brandscope::source::{load_completed, IngestBundle, MemorySource};
use brandscope::types::{
    AggregatedMetricSet, BrandMetricSummary, BrandSignal, ResponseStatus, RunKey, Scope, ScopeKey,
    ScoredResponse,
};
use chrono::{TimeZone, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/responses.json")
}

fn fixture_responses() -> Vec<ScoredResponse> {
    let source: MemorySource = IngestBundle::from_file(&fixture_path()).unwrap().into();
    load_completed(&source, &RunKey::new("u1", "r1"), None, 2).unwrap()
}

fn fixture_sets() -> Vec<AggregatedMetricSet> {
    compute_sets(
        &fixture_responses(),
        &RunKey::new("u1", "r1"),
        &BTreeMap::new(),
        Utc::now(),
    )
}

fn find<'a>(sets: &'a [AggregatedMetricSet], key: &ScopeKey) -> &'a AggregatedMetricSet {
    sets.iter()
        .find(|s| &s.scope_key() == key)
        .unwrap_or_else(|| panic!("missing set {}", key))
}

fn mention(brand: &str, mentioned: bool, score: f64) -> BrandSignal {
    BrandSignal {
        brand: brand.to_string(),
        is_owner: brand == "A",
        mentioned,
        visibility_score: score,
        position: None,
        word_count: 0,
        depth_of_mention: 0.0,
        citations: vec![],
    }
}

fn scenario_response(id: &str, brands: Vec<BrandSignal>) -> ScoredResponse {
    ScoredResponse {
        id: id.to_string(),
        user_id: "u1".to_string(),
        run_id: "r1".to_string(),
        prompt_id: id.to_string(),
        platform: "chatgpt".to_string(),
        topic: None,
        persona: None,
        tested_at: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        updated_at: None,
        status: ResponseStatus::Completed,
        brands,
    }
}

fn rank_overall(responses: &[ScoredResponse]) -> AggregatedMetricSet {
    let sets = compute_sets(responses, &RunKey::new("u1", "r1"), &BTreeMap::new(), Utc::now());
    find(&sets, &ScopeKey::Overall).clone()
}

// --- Worked scenarios ---

#[test]
fn two_brand_bucket_scenario() {
    let rs = vec![
        scenario_response("1", vec![mention("A", true, 90.0), mention("B", false, 0.0)]),
        scenario_response("2", vec![mention("A", true, 70.0), mention("B", true, 50.0)]),
        scenario_response("3", vec![mention("A", false, 0.0), mention("B", false, 0.0)]),
    ];
    let set = rank_overall(&rs);
    assert_eq!(set.total_prompts, 3);

    let a = set.brand("A").unwrap();
    assert_eq!(a.visibility_score, 80.0);
    assert_eq!(a.share_of_voice, 66.7);
    assert_eq!(a.visibility_rank, 1);

    let b = set.brand("B").unwrap();
    assert_eq!(b.visibility_score, 50.0);
    assert_eq!(b.share_of_voice, 33.3);
    assert_eq!(b.visibility_rank, 2);
}

#[test]
fn never_mentioned_brand_still_ranked_last() {
    let rs: Vec<ScoredResponse> = (1..=5)
        .map(|i| {
            scenario_response(
                &i.to_string(),
                vec![mention("A", true, 40.0 + i as f64), mention("Ghost", false, 0.0)],
            )
        })
        .collect();
    let set = rank_overall(&rs);
    let ghost = set.brand("Ghost").unwrap();
    assert_eq!(ghost.visibility_score, 0.0);
    assert_eq!(ghost.share_of_voice, 0.0);
    assert_eq!(ghost.visibility_rank, 2);
    assert_eq!(set.brands.last().unwrap().brand, "Ghost");
}

// --- Properties over the fixture ---

#[test]
fn ranks_are_dense_and_share_of_voice_bounded() {
    for set in fixture_sets() {
        let mut ranks: Vec<u32> = set.brands.iter().map(|b| b.visibility_rank).collect();
        ranks.sort();
        let expected: Vec<u32> = (1..=set.brands.len() as u32).collect();
        assert_eq!(ranks, expected, "dense ranks in {}", set.scope_key());

        let sub_ranks: [fn(&BrandMetricSummary) -> u32; 3] = [
            |b| b.avg_position_rank,
            |b| b.word_count_rank,
            |b| b.depth_of_mention_rank,
        ];
        for sub in sub_ranks {
            let mut r: Vec<u32> = set.brands.iter().map(sub).collect();
            r.sort();
            assert_eq!(r, expected, "dense sub-ranks in {}", set.scope_key());
        }

        for b in &set.brands {
            assert!((0.0..=100.0).contains(&b.share_of_voice), "{} sov {}", b.brand, b.share_of_voice);
        }
    }
}

#[test]
fn fixture_scopes_and_totals() {
    let sets = fixture_sets();
    // overall + 2 platforms + 2 topics + 3 personas
    assert_eq!(sets.len(), 8);
    for scope in Scope::ALL {
        let total: usize = sets
            .iter()
            .filter(|s| s.scope == scope)
            .map(|s| s.total_prompts)
            .sum();
        assert_eq!(total, 3, "every response counted once in {}", scope);
    }
    let unknown = find(&sets, &ScopeKey::Persona("Unknown".to_string()));
    assert_eq!(unknown.total_prompts, 1);
}

#[test]
fn fixture_overall_metrics() {
    let sets = fixture_sets();
    let overall = find(&sets, &ScopeKey::Overall);
    assert_eq!(overall.total_brands, 3);
    let names: Vec<&str> = overall.brands.iter().map(|b| b.brand.as_str()).collect();
    assert_eq!(names, vec!["Acme", "Globex", "Initech"]);

    let acme = overall.brand("Acme").unwrap();
    assert!(acme.is_owner);
    assert_eq!(acme.visibility_score, 80.0);
    assert_eq!(acme.share_of_voice, 66.7);
    assert_eq!(acme.avg_position, 1.5);
    assert_eq!(acme.word_count, 220);
    assert_eq!(acme.depth_of_mention, 2.5);
    assert_eq!((acme.first_place_count, acme.second_place_count), (1, 1));

    let globex = overall.brand("Globex").unwrap();
    assert_eq!(globex.visibility_score, 63.3);
    assert_eq!(globex.share_of_voice, 100.0);
    assert_eq!(globex.avg_position, 1.3);
    assert_eq!(globex.total_appearances, 3);

    // sub-ranks
    assert_eq!(globex.avg_position_rank, 1);
    assert_eq!(acme.avg_position_rank, 2);
    assert_eq!(globex.word_count_rank, 1);
    assert_eq!(acme.depth_of_mention_rank, 1);

    let start = Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 4, 3, 10, 0, 0).unwrap();
    assert_eq!((overall.date_range.start, overall.date_range.end), (start, end));
}

#[test]
fn fixture_platform_buckets_rank_full_competitive_set() {
    let sets = fixture_sets();
    let gemini = find(&sets, &ScopeKey::Platform("gemini".to_string()));
    let names: Vec<&str> = gemini.brands.iter().map(|b| b.brand.as_str()).collect();
    assert_eq!(names, vec!["Globex", "Initech", "Acme"]);
    let acme = gemini.brand("Acme").unwrap();
    assert_eq!(acme.visibility_score, 0.0);
    assert_eq!(acme.visibility_rank, 3);
}

#[test]
fn ranking_ignores_input_order() {
    let mut responses = fixture_responses();
    let forward = compute_sets(&responses, &RunKey::new("u1", "r1"), &BTreeMap::new(), Utc::now());
    responses.reverse();
    for r in responses.iter_mut() {
        r.brands.reverse();
    }
    let backward = compute_sets(&responses, &RunKey::new("u1", "r1"), &BTreeMap::new(), Utc::now());
    for (f, b) in forward.iter().zip(backward.iter()) {
        assert_eq!(f.brands, b.brands, "{}", f.scope_key());
    }
}

#[test]
fn single_bucket_pipeline_by_hand() {
    let responses = fixture_responses();
    let universe = BrandUniverse::from_responses(&responses);
    let buckets = partition(&responses, Scope::Topic);
    let support = &buckets[&ScopeKey::Topic("support".to_string())];
    let ranked = assign_ranks(summarize_bucket(support, &universe), None);
    assert_eq!(ranked[0].brand, "Globex");
    assert_eq!(ranked[0].share_of_voice, 100.0);
    assert!(ranked.iter().all(|b| b.rank_change.is_none()));
}
