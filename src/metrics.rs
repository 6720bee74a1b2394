// Brand metric calculator: per-brand statistics inside one bucket.
//
//   visibility_score = mean(visibility_score | mentioned)         0 if never mentioned
//   share_of_voice   = mentioned_count / bucket_prompts * 100      clamped to 0..=100
//   avg_position     = mean(position | position > 0)               0 if never positioned
//   word_count       = sum(word_count | mentioned)
//   depth_of_mention = mean(depth_of_mention | mentioned)
//
// Scores, positions and percentages are rounded to one decimal. Ranks are left at 0
// here and filled in by the ranking module.

use crate::types::{BrandMetricSummary, BrandSignal, ScoredResponse};
use crate::util::{percent, round1};
use std::collections::BTreeMap;

/// The competitive set: every brand seen anywhere in the input, with its owner flag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrandUniverse {
    brands: BTreeMap<String, bool>,
}

impl BrandUniverse {
    pub fn from_responses<'a, I>(responses: I) -> Self
    where
        I: IntoIterator<Item = &'a ScoredResponse>,
    {
        let brands = responses
            .into_iter()
            .flat_map(|r| r.brands.iter())
            .filter_map(|s| brand_name(s).map(|name| (name, s.is_owner)))
            .fold(BTreeMap::new(), |mut acc: BTreeMap<String, bool>, (name, owner)| {
                *acc.entry(name.to_string()).or_insert(false) |= owner;
                acc
            });
        Self { brands }
    }

    pub fn len(&self) -> usize {
        self.brands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brands.is_empty()
    }

    pub fn contains(&self, brand: &str) -> bool {
        self.brands.contains_key(brand)
    }

    /// (brand, is_owner) in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.brands.iter().map(|(name, owner)| (name.as_str(), *owner))
    }
}

fn brand_name(signal: &BrandSignal) -> Option<&str> {
    let name = signal.brand.trim();
    (!name.is_empty()).then_some(name)
}

/// Raw running totals for one brand in one bucket
#[derive(Debug, Clone, Default, PartialEq)]
struct BrandTally {
    appearances: u32,
    score_sum: f64,
    positioned: u32,
    position_sum: u64,
    words: u64,
    depth_sum: f64,
    places: [u32; 3],
}

impl BrandTally {
    fn record(mut self, signal: &BrandSignal) -> Self {
        if signal.mentioned {
            self.appearances += 1;
            self.score_sum += signal.visibility_score;
            self.words += u64::from(signal.word_count);
            self.depth_sum += signal.depth_of_mention;
        }
        if let Some(pos) = signal.placed_position() {
            self.positioned += 1;
            self.position_sum += u64::from(pos);
            if (1..=3).contains(&pos) {
                self.places[pos as usize - 1] += 1;
            }
        }
        self
    }

    fn finish(&self, brand: &str, is_owner: bool, bucket_prompts: usize) -> BrandMetricSummary {
        let mean = |sum: f64, n: u32| if n == 0 { 0.0 } else { sum / f64::from(n) };
        BrandMetricSummary {
            brand: brand.to_string(),
            is_owner,
            visibility_score: round1(mean(self.score_sum, self.appearances)),
            visibility_rank: 0,
            rank_change: None,
            share_of_voice: round1(percent(self.appearances as usize, bucket_prompts)),
            avg_position: round1(mean(self.position_sum as f64, self.positioned)),
            avg_position_rank: 0,
            word_count: self.words,
            word_count_rank: 0,
            depth_of_mention: round1(mean(self.depth_sum, self.appearances)),
            depth_of_mention_rank: 0,
            first_place_count: self.places[0],
            second_place_count: self.places[1],
            third_place_count: self.places[2],
            total_appearances: self.appearances,
        }
    }
}

/// One signal per brand per response; the first entry for a name wins.
fn signals_by_brand(response: &ScoredResponse) -> BTreeMap<&str, &BrandSignal> {
    response
        .brands
        .iter()
        .filter_map(|s| brand_name(s).map(|name| (name, s)))
        .fold(BTreeMap::new(), |mut acc, (name, s)| {
            acc.entry(name).or_insert(s);
            acc
        })
}

/// Summaries for every brand of the universe over one bucket, in brand-name order.
/// Brands absent from the bucket get a zero-valued row.
pub fn summarize_bucket(
    bucket: &[&ScoredResponse],
    universe: &BrandUniverse,
) -> Vec<BrandMetricSummary> {
    let tallies: BTreeMap<&str, BrandTally> = bucket
        .iter()
        .flat_map(|r| signals_by_brand(r).into_iter())
        .filter(|(name, _)| universe.contains(name))
        .fold(BTreeMap::new(), |mut acc, (name, signal)| {
            let tally = acc.remove(name).unwrap_or_default();
            acc.insert(name, tally.record(signal));
            acc
        });

    universe
        .iter()
        .map(|(brand, is_owner)| {
            tallies
                .get(brand)
                .cloned()
                .unwrap_or_default()
                .finish(brand, is_owner, bucket.len())
        })
        .collect()
}
