use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Characters that survive normalization besides alphanumerics.
/// `-` joins multi-word glosses (IX-1P), `+` marks compounds, `#` marks lexicalized fingerspelling.
const GLOSS_PUNCTUATION: &[char] = &['-', '_', '+', '#'];

/// One ASL sign unit, normalized: diacritics stripped, whitespace collapsed to `-`, upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GlossToken(String);

impl GlossToken {
    pub fn new(raw: &str) -> Result<Self, String> {
        normalize_gloss(raw)
            .map(GlossToken)
            .ok_or_else(|| format!("gloss '{}' is empty after normalization", raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Looser key used for fuzzy lookup: lower-case alphanumerics only.
    pub fn match_key(&self) -> String {
        match_key(&self.0)
    }

    /// Search phrase for external video sources.
    pub fn search_query(&self) -> String {
        let spaced = self.0.replace(['-', '_', '+'], " ");
        let upper = spaced.trim_start_matches('#');

        if upper.starts_with("IX") {
            if upper.contains("1P") {
                return "i me myself".to_string();
            }
            if upper.contains("2P") {
                return "you your".to_string();
            }
            if upper.contains("3P") {
                return "he she they".to_string();
            }
        }

        upper
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Safe file-name stem for stored assets.
    pub fn file_stem(&self) -> String {
        let stem: String = self
            .0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        if stem.trim_matches('_').is_empty() {
            "gloss".to_string()
        } else {
            stem
        }
    }
}

impl fmt::Display for GlossToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GlossToken {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        GlossToken::new(&value)
    }
}

impl From<GlossToken> for String {
    fn from(token: GlossToken) -> Self {
        token.0
    }
}

pub fn normalize_gloss(raw: &str) -> Option<String> {
    let folded: String = raw
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || GLOSS_PUNCTUATION.contains(c))
        .collect();

    let words: Vec<&str> = folded.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }

    let joined = words.join("-").to_uppercase();
    if joined.chars().all(|c| GLOSS_PUNCTUATION.contains(&c)) {
        return None;
    }
    Some(joined)
}

pub fn match_key(raw: &str) -> String {
    raw.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Parse a whitespace separated gloss line, dropping tokens that normalize to nothing.
pub fn parse_gloss_line(line: &str) -> Vec<GlossToken> {
    line.split_whitespace()
        .filter_map(|raw| GlossToken::new(raw).ok())
        .collect()
}

/// Normalized Levenshtein similarity in `[0, 1]`, case-insensitive.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let distance = levenshtein(&a, &b);
    let max_len = a.len().max(b.len());
    1.0 - distance as f64 / max_len as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
