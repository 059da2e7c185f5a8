use std::collections::BTreeMap;

/// Joiners that make a raw artist string ambiguous: one act or several
/// collaborators. Longer spellings first so `featuring` is not consumed by
/// `feat`.
const JOINERS: &[&str] = &["featuring", "feat.", "feat", "&"];

/// Aggregates ambiguous artist tokens across every file of a batch. A token
/// appearing in two files is one decision, not two. `None` means undecided
/// and blocks commit.
#[derive(Debug, Default, Clone)]
pub struct DecisionSet {
    decisions: BTreeMap<String, Option<bool>>,
}

impl DecisionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union tokens discovered during analysis into the pending set. Tokens
    /// already decided keep their decision.
    pub fn absorb<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for token in tokens {
            self.decisions.entry(token.into()).or_insert(None);
        }
    }

    /// Record a decision. Idempotent; may be called repeatedly until commit
    /// starts, last write wins. Deciding a token analysis never surfaced is
    /// harmless.
    pub fn decide(&mut self, token: &str, is_single_artist: bool) {
        self.decisions
            .insert(token.to_string(), Some(is_single_artist));
    }

    pub fn all_decided(&self) -> bool {
        self.decisions.values().all(|decision| decision.is_some())
    }

    /// Tokens still awaiting a decision, in stable order.
    pub fn pending(&self) -> Vec<String> {
        self.decisions
            .iter()
            .filter(|(_, decision)| decision.is_none())
            .map(|(token, _)| token.clone())
            .collect()
    }

    /// Artist identities a raw token resolves to. Unambiguous tokens and
    /// tokens decided "single act" keep the raw string; tokens decided
    /// "multiple artists" split on the joiner.
    pub fn identities_for(&self, raw_token: &str) -> Vec<String> {
        match self.decisions.get(raw_token) {
            Some(Some(false)) => split_token(raw_token),
            _ => vec![raw_token.to_string()],
        }
    }
}

/// True when the raw artist string contains a joiner and therefore needs an
/// operator decision.
pub fn is_ambiguous(raw_token: &str) -> bool {
    // ASCII-only lowering keeps byte offsets aligned with the raw string
    // even for accented artist names.
    let lowered = raw_token.to_ascii_lowercase();
    JOINERS.iter().any(|joiner| {
        if *joiner == "&" {
            lowered.contains('&')
        } else {
            contains_word(&lowered, joiner)
        }
    })
}

/// Split a raw token into candidate artist identities on every joiner
/// occurrence. Empty fragments are dropped.
pub fn split_token(raw_token: &str) -> Vec<String> {
    let mut parts = vec![raw_token.to_string()];

    for joiner in JOINERS {
        let mut next = Vec::new();
        for part in parts {
            if *joiner == "&" {
                next.extend(part.split('&').map(str::to_string));
            } else {
                next.extend(split_on_word(&part, joiner));
            }
        }
        parts = next;
    }

    parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_word(haystack_lower: &str, word: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack_lower[start..].find(word) {
        let begin = start + pos;
        let end = begin + word.len();
        let before_ok = begin == 0
            || !haystack_lower[..begin]
                .chars()
                .next_back()
                .is_some_and(char::is_alphanumeric);
        let after_ok = end == haystack_lower.len()
            || !haystack_lower[end..]
                .chars()
                .next()
                .is_some_and(char::is_alphanumeric);
        if before_ok && after_ok {
            return true;
        }
        start = end;
    }
    false
}

fn split_on_word(part: &str, word: &str) -> Vec<String> {
    let lowered = part.to_ascii_lowercase();
    let mut pieces = Vec::new();
    let mut cursor = 0;

    let mut search = 0;
    while let Some(pos) = lowered[search..].find(word) {
        let begin = search + pos;
        let end = begin + word.len();
        let before_ok = begin == 0
            || !lowered[..begin]
                .chars()
                .next_back()
                .is_some_and(char::is_alphanumeric);
        let after_ok =
            end == lowered.len() || !lowered[end..].chars().next().is_some_and(char::is_alphanumeric);

        if before_ok && after_ok {
            pieces.push(part[cursor..begin].to_string());
            cursor = end;
        }
        search = end;
    }

    pieces.push(part[cursor..].to_string());
    pieces
}
