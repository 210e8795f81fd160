// ============================================================
// Metric — Word Tokenizer
// ============================================================
// Penn-Treebank style word splitting used before n-gram counting:
//
//   "Alice's office isn't in Paris, it's in Rome."
//     → Alice 's office is n't in Paris , it 's in Rome .
//
// Text is first cut into sentences (terminal punctuation followed by
// whitespace and an upper-case letter) so every sentence-final period
// becomes its own token, then each sentence goes through an ordered
// list of regex rewrites and is split on whitespace.

use regex::Regex;
use std::sync::LazyLock;

struct Rule {
    pattern:     Regex,
    replacement: &'static str,
}

fn rules(table: &[(&str, &'static str)]) -> Vec<Rule> {
    table
        .iter()
        .map(|&(pattern, replacement)| Rule {
            pattern:     Regex::new(pattern).expect("tokenizer rule pattern is invalid"),
            replacement,
        })
        .collect()
}

static STARTING_QUOTES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    rules(&[
        (r#"^""#, "``"),
        (r"(``)", " ${1} "),
        (r#"([ \(\[{<])("|'')"#, "${1} `` "),
    ])
});

static PUNCTUATION: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    rules(&[
        (r"([:,])([^\d])", " ${1} ${2}"),
        (r"([:,])$", " ${1} "),
        (r"\.\.\.", " ... "),
        (r"[;@#$%&]", " ${0} "),
        (r#"([^\.])(\.)([\]\)}>"']*)\s*$"#, "${1} ${2}${3} "),
        (r"[?!]", " ${0} "),
        (r"([^'])' ", "${1} ' "),
        (r"[\]\[\(\)\{\}<>]", " ${0} "),
        (r"--", " -- "),
    ])
});

static ENDING_QUOTES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    rules(&[
        (r#"""#, " '' "),
        (r"(\S)('')", "${1} ${2} "),
        (r"([^' ])('[sS]|'[mM]|'[dD]|') ", "${1} ${2} "),
        (r"([^' ])('ll|'LL|'re|'RE|'ve|'VE|n't|N'T) ", "${1} ${2} "),
    ])
});

static CONTRACTIONS: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    rules(&[
        (r"(?i)\b(can)(not)\b", " ${1} ${2} "),
        (r"(?i)\b(d)('ye)\b", " ${1} ${2} "),
        (r"(?i)\b(gim)(me)\b", " ${1} ${2} "),
        (r"(?i)\b(gon)(na)\b", " ${1} ${2} "),
        (r"(?i)\b(got)(ta)\b", " ${1} ${2} "),
        (r"(?i)\b(lem)(me)\b", " ${1} ${2} "),
        (r"(?i)\b(more)('n)\b", " ${1} ${2} "),
        (r"(?i)\b(wan)(na)\s", " ${1} ${2} "),
        (r"(?i) ('t)(is)\b", " ${1} ${2} "),
        (r"(?i) ('t)(was)\b", " ${1} ${2} "),
    ])
});

fn apply(text: String, rules: &[Rule]) -> String {
    rules.iter().fold(text, |acc, rule| {
        rule.pattern.replace_all(&acc, rule.replacement).into_owned()
    })
}

/// Splits after `.`, `!` or `?` when whitespace and an upper-case letter follow.
fn split_sentences(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start     = 0;

    for (i, &(byte_idx, c)) in chars.iter().enumerate() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let mut j = i + 1;
        while j < chars.len() && chars[j].1.is_whitespace() {
            j += 1;
        }
        if j > i + 1 && j < chars.len() && chars[j].1.is_uppercase() {
            let end = byte_idx + c.len_utf8();
            sentences.push(&text[start..end]);
            start = chars[j].0;
        }
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

fn tokenize_sentence(sentence: &str) -> Vec<String> {
    let text = apply(sentence.to_string(), &STARTING_QUOTES);
    let text = apply(text, &PUNCTUATION);
    let text = format!(" {text} ");
    let text = apply(text, &ENDING_QUOTES);
    let text = apply(text, &CONTRACTIONS);
    text.split_whitespace().map(str::to_string).collect()
}

/// Treebank-style word tokens of `text`.
pub fn word_tokenize(text: &str) -> Vec<String> {
    split_sentences(text.trim())
        .into_iter()
        .flat_map(tokenize_sentence)
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn toks(text: &str) -> Vec<String> {
        word_tokenize(text)
    }

    #[test]
    fn test_final_period_is_split() {
        assert_eq!(toks("Alice works at Bank."), vec!["Alice", "works", "at", "Bank", "."]);
    }

    #[test]
    fn test_commas_and_contractions() {
        assert_eq!(
            toks("It's in Rome, isn't it?"),
            vec!["It", "'s", "in", "Rome", ",", "is", "n't", "it", "?"]
        );
    }

    #[test]
    fn test_numbers_keep_their_separators() {
        assert_eq!(toks("It costs 1,000.5 euros."), vec!["It", "costs", "1,000.5", "euros", "."]);
    }

    #[test]
    fn test_every_sentence_period_is_split() {
        assert_eq!(
            toks("Alice is a pilot. She lives in Paris."),
            vec!["Alice", "is", "a", "pilot", ".", "She", "lives", "in", "Paris", "."]
        );
    }

    #[test]
    fn test_abbreviation_inside_sentence_stays() {
        assert_eq!(toks("Born in the U.S. in 1990"), vec!["Born", "in", "the", "U.S.", "in", "1990"]);
    }

    #[test]
    fn test_brackets_and_quotes() {
        assert_eq!(
            toks(r#"The "Bank" (founded 1900)"#),
            vec!["The", "``", "Bank", "''", "(", "founded", "1900", ")"]
        );
    }

    #[test]
    fn test_cannot_is_two_words() {
        assert_eq!(toks("I cannot go"), vec!["I", "can", "not", "go"]);
    }

    #[test]
    fn test_empty_text() {
        assert!(word_tokenize("").is_empty());
        assert!(word_tokenize("   ").is_empty());
    }
}
