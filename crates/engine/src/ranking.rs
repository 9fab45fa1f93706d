//! Deterministic ordering of online search candidates.
//!
//! Candidates are compared on title similarity to the search phrase (after
//! dropping words every sign-language video title carries), then on whether
//! they come from a known sign dictionary, then on duration, shortest first,
//! then on candidate id so equal scores never flip between runs.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::gloss::similarity;

/// Title words that say nothing about which sign a video shows.
const TITLE_NOISE: &[&str] = &[
    "asl", "sign", "signs", "signing", "language", "american", "how", "to", "in", "for",
    "the", "a", "word", "learn", "tutorial", "lesson", "dictionary", "deaf", "video",
];

/// Uploaders and sites whose sign videos are reliable dictionary entries.
const TRUSTED_SOURCES: &[&str] = &[
    "lifeprint", "dr. vicars", "bill vicars", "signing savvy", "signingsavvy", "asl dictionary",
    "handspeak", "asl rochelle", "asl connect",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub id: String,
    pub title: String,
    pub url: String,
    pub duration_secs: Option<f64>,
    pub uploader: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingRules {
    /// Minimum title similarity in `[0, 1]`.
    pub min_similarity: f64,
    /// Longest acceptable source video.
    pub max_duration_secs: f64,
}

impl Default for RankingRules {
    fn default() -> Self {
        RankingRules {
            min_similarity: 0.6,
            max_duration_secs: 600.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub candidate: SearchCandidate,
    pub similarity: f64,
    pub trusted: bool,
}

impl SearchCandidate {
    /// Uploaded by, or titled after, a known sign dictionary.
    pub fn is_trusted_source(&self) -> bool {
        let title = self.title.to_lowercase();
        let uploader = self.uploader.as_deref().unwrap_or_default().to_lowercase();
        TRUSTED_SOURCES
            .iter()
            .any(|source| title.contains(source) || uploader.contains(source))
    }
}

fn title_words(title: &str) -> Vec<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Similarity of a video title to the search phrase.
///
/// 1.0 when the title contains the phrase as whole words, otherwise the
/// normalized edit similarity against the title with noise words removed.
pub fn title_similarity(query: &str, title: &str) -> f64 {
    let query_words = title_words(query);
    if query_words.is_empty() {
        return 0.0;
    }

    let words = title_words(title);
    if words.windows(query_words.len()).any(|w| w == query_words.as_slice()) {
        return 1.0;
    }

    let informative: Vec<&str> = words
        .iter()
        .map(String::as_str)
        .filter(|w| !TITLE_NOISE.contains(w))
        .collect();

    similarity(&query_words.join(" "), &informative.join(" "))
}

fn compare(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| b.trusted.cmp(&a.trusted))
        .then_with(|| {
            let da = a.candidate.duration_secs.unwrap_or(f64::MAX);
            let db = b.candidate.duration_secs.unwrap_or(f64::MAX);
            da.total_cmp(&db)
        })
        .then_with(|| a.candidate.id.cmp(&b.candidate.id))
}

/// Filter and order candidates; the first element is the one to download.
pub fn rank_candidates(query: &str, candidates: Vec<SearchCandidate>, rules: &RankingRules) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .filter(|c| {
            c.duration_secs
                .is_some_and(|d| d > 0.0 && d <= rules.max_duration_secs)
        })
        .map(|candidate| RankedCandidate {
            similarity: title_similarity(query, &candidate.title),
            trusted: candidate.is_trusted_source(),
            candidate,
        })
        .filter(|r| r.similarity >= rules.min_similarity)
        .collect();

    ranked.sort_by(compare);
    ranked.dedup_by(|a, b| a.candidate.id == b.candidate.id);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, title: &str, duration: Option<f64>) -> SearchCandidate {
        SearchCandidate {
            id: id.to_string(),
            title: title.to_string(),
            url: format!("https://www.youtube.com/watch?v={}", id),
            duration_secs: duration,
            uploader: None,
        }
    }

    #[test]
    fn whole_word_match_scores_one() {
        assert_eq!(title_similarity("hello", "HELLO in ASL"), 1.0);
        assert_eq!(title_similarity("thank you", "How to sign THANK YOU"), 1.0);
        assert!(title_similarity("hello", "Othello reading") < 1.0);
    }

    #[test]
    fn noise_words_are_ignored() {
        assert!(title_similarity("name", "ASL Sign Language: Names") > 0.7);
    }

    #[test]
    fn ranks_by_similarity_then_duration_then_id() {
        let ranked = rank_candidates(
            "hello",
            vec![
                candidate("c", "Hello ASL", Some(12.0)),
                candidate("b", "Hello ASL", Some(4.0)),
                candidate("a", "Hello sign", Some(4.0)),
                candidate("d", "Helo", Some(1.0)),
            ],
            &RankingRules::default(),
        );
        let ids: Vec<&str> = ranked.iter().map(|r| r.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn trusted_sources_win_ties_on_similarity() {
        let mut lifeprint = candidate("z", "HELLO", Some(9.0));
        lifeprint.uploader = Some("Bill Vicars".to_string());
        let ranked = rank_candidates(
            "hello",
            vec![
                candidate("a", "Hello ASL", Some(2.0)),
                lifeprint,
                candidate("s", "Hello - Signing Savvy", Some(5.0)),
                candidate("b", "Helo", Some(1.0)),
            ],
            &RankingRules::default(),
        );
        let ids: Vec<&str> = ranked.iter().map(|r| r.candidate.id.as_str()).collect();
        // similarity still comes first: the weaker title stays last
        assert_eq!(ids, vec!["s", "z", "a", "b"]);
        assert!(ranked[0].trusted && ranked[1].trusted && !ranked[2].trusted);
    }

    #[test]
    fn drops_unknown_long_and_dissimilar_candidates() {
        let ranked = rank_candidates(
            "hello",
            vec![
                candidate("long", "Hello ASL", Some(3600.0)),
                candidate("unknown", "Hello ASL", None),
                candidate("other", "Cooking pasta", Some(5.0)),
            ],
            &RankingRules::default(),
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn duplicate_ids_collapse() {
        let ranked = rank_candidates(
            "hello",
            vec![candidate("a", "Hello ASL", Some(3.0)), candidate("a", "Hello ASL", Some(3.0))],
            &RankingRules::default(),
        );
        assert_eq!(ranked.len(), 1);
    }
}
