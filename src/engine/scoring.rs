// 🎯 Feature Scoring - fuzzy comparison of feature values
//
// Values are normalized first (case, punctuation, organization suffixes),
// then compared by Levenshtein similarity. The 0-100 score lands in a
// scoring bucket, and the buckets per feature type decide the match level.

use std::collections::BTreeMap;

use crate::payload::{MatchLevel, RawFeatureScore, ScoringBucket};

pub const NAME_FEATURE: &str = "NAME";

/// Normalize a feature value for comparison.
///
/// "ACME Corp." and "acme" normalize to the same string so the engine can
/// fold them into one feature with duplicate values.
pub fn normalize_value(feature_type: &str, value: &str) -> String {
    let mut normalized: String = value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if feature_type == NAME_FEATURE {
        let suffixes = [" inc", " corp", " llc", " ltd", " co", " corporation", " company"];
        for suffix in &suffixes {
            if normalized.ends_with(suffix) {
                normalized.truncate(normalized.len() - suffix.len());
                break;
            }
        }
    }

    // phone numbers, dates and id numbers compare on their digits
    if feature_type != NAME_FEATURE && feature_type != "ADDRESS" {
        let digits: String = normalized.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() >= 4 {
            return digits;
        }
    }

    normalized
}

/// Minimum number of single-character edits turning one string into another
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();
    let len1 = s1_chars.len();
    let len2 = s2_chars.len();

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    let mut matrix = vec![vec![0; len2 + 1]; len1 + 1];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=len2 {
        matrix[0][j] = j;
    }

    for i in 1..=len1 {
        for j in 1..=len2 {
            let cost = if s1_chars[i - 1] == s2_chars[j - 1] { 0 } else { 1 };
            matrix[i][j] = std::cmp::min(
                std::cmp::min(
                    matrix[i - 1][j] + 1, // deletion
                    matrix[i][j - 1] + 1, // insertion
                ),
                matrix[i - 1][j - 1] + cost, // substitution
            );
        }
    }

    matrix[len1][len2]
}

/// Similarity of two values on a 0-100 scale, 100 meaning identical
/// after normalization
pub fn similarity(feature_type: &str, inbound: &str, candidate: &str) -> i32 {
    let a = normalize_value(feature_type, inbound);
    let b = normalize_value(feature_type, candidate);
    if a == b {
        return 100;
    }
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 0;
    }
    let distance = levenshtein_distance(&a, &b);
    (100.0 * (1.0 - distance as f64 / longest as f64)).round() as i32
}

pub fn bucket_for(score: i32) -> ScoringBucket {
    match score {
        s if s >= 100 => ScoringBucket::Same,
        s if s >= 90 => ScoringBucket::Close,
        s if s >= 80 => ScoringBucket::Likely,
        s if s >= 70 => ScoringBucket::Plausible,
        s if s >= 50 => ScoringBucket::Unlikely,
        _ => ScoringBucket::NoChance,
    }
}

/// One inbound value, tagged with whether it is an organization name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundValue {
    pub value: String,
    pub organization: bool,
}

impl InboundValue {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
            organization: false,
        }
    }

    pub fn organization(value: &str) -> Self {
        Self {
            value: value.to_string(),
            organization: true,
        }
    }
}

/// Best-scoring pair per feature type present on both sides
pub fn score_features(
    inbound: &BTreeMap<String, Vec<InboundValue>>,
    candidate: &BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, Vec<RawFeatureScore>> {
    let mut scores = BTreeMap::new();

    for (feature_type, inbound_values) in inbound {
        let candidate_values = match candidate.get(feature_type) {
            Some(values) if !values.is_empty() => values,
            _ => continue,
        };

        let mut best: Option<(i32, &InboundValue, &String)> = None;
        for inbound_value in inbound_values {
            for candidate_value in candidate_values {
                let score = similarity(feature_type, &inbound_value.value, candidate_value);
                if best.map_or(true, |(top, _, _)| score > top) {
                    best = Some((score, inbound_value, candidate_value));
                }
            }
        }

        if let Some((score, inbound_value, candidate_value)) = best {
            let is_name = feature_type == NAME_FEATURE;
            scores.insert(
                feature_type.clone(),
                vec![RawFeatureScore {
                    inbound_feat: inbound_value.value.clone(),
                    candidate_feat: candidate_value.clone(),
                    full_score: score,
                    score_bucket: bucket_for(score),
                    full_name_score: (is_name && !inbound_value.organization).then_some(score),
                    org_name_score: (is_name && inbound_value.organization).then_some(score),
                }],
            );
        }
    }

    scores
}

fn best_bucket(scores: &[RawFeatureScore]) -> Option<ScoringBucket> {
    scores.iter().map(|s| s.score_bucket).min()
}

/// Decide the match level from per-feature-type scores.
///
/// A name plus another close feature resolves; a name plus something weaker
/// is possibly the same; other features without a name only suggest a
/// relation; a name alone is a name-only match.
pub fn classify(scores: &BTreeMap<String, Vec<RawFeatureScore>>) -> MatchLevel {
    let name_matches = scores
        .get(NAME_FEATURE)
        .and_then(|s| best_bucket(s))
        .map_or(false, |bucket| bucket <= ScoringBucket::Close);

    let others: Vec<ScoringBucket> = scores
        .iter()
        .filter(|(feature_type, _)| feature_type.as_str() != NAME_FEATURE)
        .filter_map(|(_, s)| best_bucket(s))
        .collect();
    let other_strong = others.iter().any(|b| *b <= ScoringBucket::Close);
    let other_weak = others.iter().any(|b| *b <= ScoringBucket::Plausible);

    match (name_matches, other_strong, other_weak) {
        (true, true, _) => MatchLevel::Resolved,
        (true, false, true) => MatchLevel::PossiblySame,
        (false, true, _) => MatchLevel::PossiblyRelated,
        (true, false, false) => MatchLevel::NameOnly,
        (false, false, _) => MatchLevel::NoMatch,
    }
}

/// Key of `+TYPE` tokens for features that agreed and `-TYPE` for those that
/// argued against
pub fn match_key(scores: &BTreeMap<String, Vec<RawFeatureScore>>) -> String {
    let mut key = String::new();
    for (feature_type, feature_scores) in scores {
        match best_bucket(feature_scores) {
            Some(bucket) if bucket <= ScoringBucket::Close => {
                key.push('+');
                key.push_str(feature_type);
            }
            Some(bucket) if bucket >= ScoringBucket::Unlikely => {
                key.push('-');
                key.push_str(feature_type);
            }
            _ => {}
        }
    }
    key
}

// ============================================================================
// TESTS
// ============================================================================
