//! Fuzzy matching algorithms.
//!
//! Expands one query token into the index terms it should match: the exact
//! term, terms it is a prefix of, and terms within a length-scaled edit
//! distance. Pure functions over a borrowed vocabulary, safe to call from any
//! number of threads.

use storefront_core::config::FuzzyConfig;

/// Calculate Levenshtein edit distance between two strings.
///
/// # Arguments
/// * `a` - First string
/// * `b` - Second string
///
/// # Returns
/// Number of single-character edits needed to transform a into b
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    let m = a_chars.len();
    let n = b_chars.len();

    if m == 0 { return n; }
    if n == 0 { return m; }

    // Use two rows for space optimization
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a_chars[i - 1] != b_chars[j - 1]);
            curr[j] = (prev[j] + 1)
                .min(curr[j - 1] + 1)
                .min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Edit distance between `a` and `b` if it is at most `max`.
///
/// With `transpositions` an adjacent swap ("ot" for "to") counts as one edit
/// (optimal string alignment distance). Stops early once no cell in the last
/// two rows can come back under the bound.
pub fn edit_distance_within(a: &str, b: &str, max: usize, transpositions: bool) -> Option<usize> {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    let m = a_chars.len();
    let n = b_chars.len();

    if m.abs_diff(n) > max {
        return None;
    }
    if m == 0 || n == 0 {
        return Some(m.max(n));
    }

    // Three rows: transpositions look two rows back
    let mut before: Vec<usize> = vec![0; n + 1];
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0; n + 1];
    let mut prev_min = 0;

    for i in 1..=m {
        curr[0] = i;
        let mut row_min = curr[0];
        for j in 1..=n {
            let cost = usize::from(a_chars[i - 1] != b_chars[j - 1]);
            let mut value = (prev[j] + 1)
                .min(curr[j - 1] + 1)
                .min(prev[j - 1] + cost);
            if transpositions
                && i > 1
                && j > 1
                && a_chars[i - 1] == b_chars[j - 2]
                && a_chars[i - 2] == b_chars[j - 1]
            {
                value = value.min(before[j - 2] + 1);
            }
            curr[j] = value;
            row_min = row_min.min(value);
        }
        if row_min > max && prev_min > max {
            return None;
        }
        prev_min = row_min;
        std::mem::swap(&mut before, &mut prev);
        std::mem::swap(&mut prev, &mut curr);
    }

    Some(prev[n]).filter(|d| *d <= max)
}

/// How a query token reached an index term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Same term
    Exact,
    /// Query token is a prefix of the term
    Prefix,
    /// Term is within the edit-distance bound
    Typo {
        /// Edits between token and term
        distance: usize,
    },
}

impl MatchKind {
    /// Short label used in match explanations.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Prefix => "prefix",
            Self::Typo { .. } => "typo",
        }
    }
}

/// One index term a query token expanded to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TermMatch<'a> {
    /// The index term
    pub term: &'a str,
    /// How it matched
    pub kind: MatchKind,
    /// 1.0 for exact, lower for prefix and typo matches
    pub quality: f64,
}

/// Expands query tokens against a sorted vocabulary.
#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    config: FuzzyConfig,
}

impl FuzzyMatcher {
    pub fn new(config: FuzzyConfig) -> Self {
        Self { config }
    }

    /// Largest edit distance tolerated for a token of `token_len` characters.
    pub fn max_distance(&self, token_len: usize) -> usize {
        if token_len >= self.config.long_token_len {
            self.config.long_max_distance
        } else if token_len >= self.config.min_fuzzy_len {
            self.config.short_max_distance
        } else {
            0
        }
    }

    fn prefix_quality(&self, token_len: usize, term_len: usize) -> f64 {
        let base = self.config.prefix_base_quality;
        let coverage = token_len as f64 / term_len.max(1) as f64;
        (base + (1.0 - base) * coverage).min(1.0 - f64::EPSILON)
    }

    fn typo_quality(&self, distance: usize) -> f64 {
        1.0 - self.config.edit_penalty * distance as f64
    }

    /// Expand `token` into matching terms of `vocabulary`.
    ///
    /// `vocabulary` must be sorted and deduplicated. Results are ordered by
    /// quality, best first, then by term; an exact match always comes first.
    /// When an exact match exists, edit-distance expansion is skipped.
    pub fn expand<'a>(&self, token: &str, vocabulary: &'a [String]) -> Vec<TermMatch<'a>> {
        let token_len = token.chars().count();
        let mut matches = Vec::new();

        let exact = vocabulary.binary_search_by(|t| t.as_str().cmp(token)).ok();
        if let Some(index) = exact {
            matches.push(TermMatch {
                term: vocabulary[index].as_str(),
                kind: MatchKind::Exact,
                quality: 1.0,
            });
        }

        let start = vocabulary.partition_point(|t| t.as_str() < token);
        for term in vocabulary[start..]
            .iter()
            .take_while(|t| t.starts_with(token))
            .filter(|t| t.as_str() != token)
        {
            matches.push(TermMatch {
                term: term.as_str(),
                kind: MatchKind::Prefix,
                quality: self.prefix_quality(token_len, term.chars().count()),
            });
        }

        let max_distance = self.max_distance(token_len);
        if exact.is_none() && max_distance > 0 {
            for term in vocabulary {
                if term.starts_with(token) {
                    continue;
                }
                if term.chars().count().abs_diff(token_len) > max_distance {
                    continue;
                }
                if let Some(distance) =
                    edit_distance_within(token, term, max_distance, self.config.transpositions)
                {
                    let quality = self.typo_quality(distance);
                    if distance > 0 && quality > 0.0 {
                        matches.push(TermMatch {
                            term: term.as_str(),
                            kind: MatchKind::Typo { distance },
                            quality,
                        });
                    }
                }
            }
        }

        matches.sort_by(|a, b| b.quality.total_cmp(&a.quality).then_with(|| a.term.cmp(b.term)));
        matches.truncate(self.config.max_expansions.max(1));
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn vocab(terms: &[&str]) -> Vec<String> {
        let mut v: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
        v.sort();
        v.dedup();
        v
    }

    fn matcher() -> FuzzyMatcher {
        FuzzyMatcher::new(FuzzyConfig::default())
    }

    #[test]
    fn test_levenshtein_same() {
        assert_eq!(levenshtein_distance("hello", "hello"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein_distance("hello", "hallo"), 1);
    }

    #[test]
    fn test_levenshtein_insert() {
        assert_eq!(levenshtein_distance("helo", "hello"), 1);
    }

    #[test]
    fn test_levenshtein_delete() {
        assert_eq!(levenshtein_distance("hello", "helo"), 1);
    }

    #[test]
    fn test_transposition_counts_once() {
        assert_eq!(levenshtein_distance("lapotp", "laptop"), 2);
        assert_eq!(edit_distance_within("lapotp", "laptop", 1, true), Some(1));
        assert_eq!(edit_distance_within("lapotp", "laptop", 1, false), None);
    }

    #[test]
    fn test_bound_rejects_length_gap() {
        assert_eq!(edit_distance_within("tv", "television", 2, true), None);
    }

    #[test]
    fn test_distance_bound_scales_with_length() {
        let m = matcher();
        assert_eq!(m.max_distance(3), 0);
        assert_eq!(m.max_distance(4), 1);
        assert_eq!(m.max_distance(6), 1);
        assert_eq!(m.max_distance(7), 2);
    }

    #[test]
    fn test_exact_match_has_full_quality() {
        let v = vocab(&["laptop", "laptops", "lamp"]);
        let matches = matcher().expand("laptop", &v);
        assert_eq!(matches[0].term, "laptop");
        assert_eq!(matches[0].kind, MatchKind::Exact);
        assert_eq!(matches[0].quality, 1.0);
    }

    #[test]
    fn test_exact_match_skips_typo_expansion() {
        let v = vocab(&["case", "cast", "cafe"]);
        let matches = matcher().expand("case", &v);
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_prefix_match() {
        let v = vocab(&["laptop", "lamp", "label"]);
        let matches = matcher().expand("lap", &v);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].term, "laptop");
        assert_eq!(matches[0].kind, MatchKind::Prefix);
        assert!(matches[0].quality < 1.0);
    }

    #[test]
    fn test_typo_match_with_transposition() {
        let v = vocab(&["laptop", "desktop"]);
        let matches = matcher().expand("lapotp", &v);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].term, "laptop");
        assert_eq!(matches[0].kind, MatchKind::Typo { distance: 1 });
    }

    #[test]
    fn test_short_tokens_get_no_typo_tolerance() {
        let v = vocab(&["cat", "cut"]);
        let matches = matcher().expand("cot", &v);
        assert!(matches.is_empty());
    }

    #[test]
    fn test_medium_tokens_reject_two_edits() {
        let v = vocab(&["phone"]);
        assert!(matcher().expand("phxnx", &v).is_empty());
        assert_eq!(matcher().expand("phxne", &v).len(), 1);
    }

    #[test]
    fn test_long_tokens_accept_two_edits() {
        let v = vocab(&["keyboard"]);
        let matches = matcher().expand("kyeboadr", &v);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].kind, MatchKind::Typo { distance: 2 });
    }

    #[test]
    fn test_quality_ordering() {
        let v = vocab(&["monitor", "monitors", "monito"]);
        let matches = matcher().expand("monitor", &v);
        assert_eq!(matches[0].kind, MatchKind::Exact);
        assert!(matches.windows(2).all(|w| w[0].quality >= w[1].quality));
    }

    #[test]
    fn test_expansions_are_capped() {
        let terms: Vec<String> = (0..200).map(|i| format!("item{i:03}")).collect();
        let config = FuzzyConfig {
            max_expansions: 10,
            ..FuzzyConfig::default()
        };
        let matches = FuzzyMatcher::new(config).expand("item", &terms);
        assert_eq!(matches.len(), 10);
    }

    proptest! {
        #[test]
        fn prop_bounded_agrees_with_levenshtein(a in "[a-e]{0,8}", b in "[a-e]{0,8}", max in 0usize..4) {
            let full = levenshtein_distance(&a, &b);
            let bounded = edit_distance_within(&a, &b, max, false);
            if full <= max {
                prop_assert_eq!(bounded, Some(full));
            } else {
                prop_assert_eq!(bounded, None);
            }
        }

        #[test]
        fn prop_distance_is_symmetric(a in "[a-z]{0,10}", b in "[a-z]{0,10}") {
            prop_assert_eq!(levenshtein_distance(&a, &b), levenshtein_distance(&b, &a));
            prop_assert_eq!(
                edit_distance_within(&a, &b, 3, true),
                edit_distance_within(&b, &a, 3, true)
            );
        }

        #[test]
        fn prop_transpositions_never_increase_distance(a in "[a-d]{0,8}", b in "[a-d]{0,8}") {
            let with = edit_distance_within(&a, &b, 16, true).unwrap();
            let without = edit_distance_within(&a, &b, 16, false).unwrap();
            prop_assert!(with <= without);
        }
    }
}
