//! Approximate string matching for the word search box.
//!
//! Everything here is pure and works on Unicode scalar values, so `å`, `ä`
//! and `ö` each count as a single edit.

use synonymer_shared::Explanation;

/// Levenshtein edit distance with unit insert/delete/substitute costs.
pub fn distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    // track[j][i]: distance between a[..i] and b[..j]
    let mut track = vec![vec![0usize; a.len() + 1]; b.len() + 1];
    for (i, cell) in track[0].iter_mut().enumerate() {
        *cell = i;
    }
    for (j, row) in track.iter_mut().enumerate() {
        row[0] = j;
    }

    for j in 1..=b.len() {
        for i in 1..=a.len() {
            let substitution = usize::from(a[i - 1] != b[j - 1]);
            track[j][i] = (track[j][i - 1] + 1)
                .min(track[j - 1][i] + 1)
                .min(track[j - 1][i - 1] + substitution);
        }
    }

    track[b.len()][a.len()]
}

/// Largest distance a fuzzy match may have for `query`.
pub fn threshold(query: &str) -> usize {
    (query.chars().count() / 3).max(2)
}

/// Filter and order `items` against `query`.
///
/// Items whose key contains the query (case-insensitively) come first, in
/// their original order. The rest are kept only if their key is within
/// [`threshold`] edits of the query, and follow sorted by distance; equal
/// distances keep their original order. An empty query returns `items` as is.
pub fn rank<T, K>(query: &str, items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T>
where
    K: AsRef<str>,
{
    if query.is_empty() {
        return items;
    }

    let query = query.to_lowercase();
    let limit = threshold(&query);

    let mut contains = Vec::new();
    let mut fuzzy = Vec::new();
    for item in items {
        let candidate = key(&item).as_ref().to_lowercase();
        if candidate.contains(&query) {
            contains.push(item);
            continue;
        }
        let dist = distance(&query, &candidate);
        if dist <= limit {
            fuzzy.push((dist, item));
        }
    }

    // sort_by_key is stable, which keeps ties in input order
    fuzzy.sort_by_key(|(dist, _)| *dist);
    contains.extend(fuzzy.into_iter().map(|(_, item)| item));
    contains
}

/// Rank explanations by their word.
pub fn search_explanations(query: &str, items: Vec<Explanation>) -> Vec<Explanation> {
    rank(query.trim(), items, |e| e.word.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn distance_matches_known_values() {
        assert_eq!(distance("kitten", "sitting"), 3);
        assert_eq!(distance("", "abc"), 3);
        assert_eq!(distance("abc", ""), 3);
        assert_eq!(distance("flaw", "lawn"), 2);
        assert_eq!(distance("hälsa", "halsa"), 1);
    }

    #[test]
    fn threshold_never_drops_below_two() {
        assert_eq!(threshold(""), 2);
        assert_eq!(threshold("cat"), 2);
        assert_eq!(threshold("abcdefghi"), 3);
        assert_eq!(threshold("åäöåäöåäöåäö"), 4);
    }

    #[test]
    fn rank_keeps_close_words_and_drops_distant_ones() {
        let ranked = rank("cat", vec!["bat", "cot", "dog"], |s| *s);
        assert_eq!(ranked, vec!["bat", "cot"]);
    }

    #[test]
    fn substring_matches_come_before_fuzzy_matches() {
        let items = vec!["kat", "katt", "kattunge", "hatt", "mat"];
        let ranked = rank("katt", items, |s| *s);
        assert_eq!(ranked, vec!["katt", "kattunge", "kat", "hatt", "mat"]);
    }

    #[test]
    fn fuzzy_matches_are_sorted_by_distance() {
        let items = vec!["glada", "glas", "gladde", "glad"];
        let ranked = rank("glat", items, |s| *s);
        assert_eq!(ranked, vec!["glas", "glad", "glada"]);
    }

    #[test]
    fn matching_ignores_case() {
        let ranked = rank("GLAD", vec!["Glad", "sorgsen"], |s| *s);
        assert_eq!(ranked, vec!["Glad"]);
    }

    #[test]
    fn empty_query_returns_items_unchanged() {
        let items = vec!["b", "a", "c"];
        assert_eq!(rank("", items.clone(), |s| *s), items);
    }

    #[test]
    fn long_query_against_short_items() {
        let ranked = rank("fantastiskt", vec!["fan", "fantastisk"], |s| *s);
        assert_eq!(ranked, vec!["fantastisk"]);
    }

    proptest! {
        #[test]
        fn distance_is_symmetric(a in "\\PC{0,12}", b in "\\PC{0,12}") {
            prop_assert_eq!(distance(&a, &b), distance(&b, &a));
        }

        #[test]
        fn distance_to_self_is_zero(a in "\\PC{0,16}") {
            prop_assert_eq!(distance(&a, &a), 0);
        }

        #[test]
        fn distance_is_bounded_by_longer_string(a in "\\PC{0,12}", b in "\\PC{0,12}") {
            let bound = a.chars().count().max(b.chars().count());
            prop_assert!(distance(&a, &b) <= bound);
        }

        #[test]
        fn exact_key_ranks_first(words in proptest::collection::vec("[a-z]{1,8}", 1..8), pick in any::<proptest::sample::Index>()) {
            let target = words[pick.index(words.len())].clone();
            let ranked = rank(&target, words.clone(), |s| s.clone());
            prop_assert!(!ranked.is_empty());
            prop_assert!(ranked[0].contains(&target));
        }
    }
}
