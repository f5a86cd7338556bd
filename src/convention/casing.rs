//! Identifier casing rules.
//!
//! A casing rule splits an identifier into words and re-joins them in a target style.
//! Word boundaries are `_`, `-`, whitespace, a lower-case letter or digit followed by an
//! upper-case letter (`userId` -> `user`, `Id`) and the end of an acronym
//! (`HTTPServer` -> `HTTP`, `Server`). Digits stay attached to the word they follow.
//!
//! Pascal and camel joins only start a new capital where splitting the result again
//! finds the same boundary. Otherwise the word is folded into its predecessor in lower
//! case (`x_y_coordinate` -> `XyCoordinate`), so every rule is idempotent.

use serde::{Deserialize, Serialize};

/// Target casing for database identifiers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum CasingRule {
    /// `user_get_by_id`
    LowerSnake,
    /// `USER_GET_BY_ID`
    UpperSnake,
    /// `user-get-by-id`
    Kebab,
    /// `userGetById`
    Camel,
    /// `UserGetById`
    Pascal,
    /// `usergetbyid`
    Lower,
    /// `USERGETBYID`
    Upper,
}

impl CasingRule {
    /// Re-case `name` according to this rule.
    pub fn apply(&self, name: &str) -> String {
        let words = split_words(name);
        match self {
            Self::LowerSnake => join_mapped(&words, "_", str::to_lowercase),
            Self::UpperSnake => upper_snake(&words),
            Self::Kebab => join_mapped(&words, "-", str::to_lowercase),
            Self::Lower => join_mapped(&words, "", str::to_lowercase),
            Self::Upper => join_mapped(&words, "", str::to_uppercase),
            Self::Pascal => join_capitalized(&words, false),
            Self::Camel => join_capitalized(&words, true),
        }
    }

    /// Whether `name` is already written in this casing.
    ///
    /// A name conforms when re-casing it is a no-op.
    pub fn is_satisfied_by(&self, name: &str) -> bool {
        self.apply(name) == name
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowerSnake => "lower_snake",
            Self::UpperSnake => "upper_snake",
            Self::Kebab => "kebab",
            Self::Camel => "camel",
            Self::Pascal => "pascal",
            Self::Lower => "lower",
            Self::Upper => "upper",
        }
    }
}

impl std::fmt::Display for CasingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split an identifier into its words.
pub fn split_words(name: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = name.char_indices().collect();
    let mut words = Vec::new();
    let mut start: Option<usize> = None;

    for (pos, &(idx, c)) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c.is_whitespace() {
            if let Some(s) = start.take() {
                words.push(&name[s..idx]);
            }
            continue;
        }

        let Some(s) = start else {
            start = Some(idx);
            continue;
        };

        if c.is_uppercase() {
            let prev = chars[pos - 1].1;
            let next_is_lower = chars
                .get(pos + 1)
                .is_some_and(|&(_, n)| n.is_lowercase());
            // fooBar | foo2Bar | HTTPServer
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary {
                words.push(&name[s..idx]);
                start = Some(idx);
            }
        }
    }

    if let Some(s) = start {
        words.push(&name[s..]);
    }
    words
}

fn join_mapped(words: &[&str], sep: &str, f: impl Fn(&str) -> String) -> String {
    words.iter().map(|&w| f(w)).collect::<Vec<_>>().join(sep)
}

// Upper-casing can expose a digit-to-letter boundary (`b1x` -> `B1X`), so each word is
// split again after it is upper-cased.
fn upper_snake(words: &[&str]) -> String {
    let mut parts = Vec::with_capacity(words.len());
    for word in words {
        let upper = word.to_uppercase();
        parts.extend(split_words(&upper).into_iter().map(str::to_string));
    }
    parts.join("_")
}

fn join_capitalized(words: &[&str], lower_first: bool) -> String {
    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        if i == 0 && lower_first {
            out.push_str(&word.to_lowercase());
            continue;
        }
        let rendered = capitalize(word);
        if starts_word(out.chars().last(), &rendered) {
            out.push_str(&rendered);
        } else {
            out.push_str(&rendered.to_lowercase());
        }
    }
    out
}

/// Whether `split_words` would break before `word` when it follows `prev`.
fn starts_word(prev: Option<char>, word: &str) -> bool {
    let Some(prev) = prev else {
        return true;
    };
    let mut chars = word.chars();
    let first_upper = chars.next().is_some_and(char::is_uppercase);
    let next_is_lower = chars.next().is_some_and(char::is_lowercase);
    first_upper
        && (prev.is_lowercase()
            || prev.is_ascii_digit()
            || (prev.is_uppercase() && next_is_lower))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
