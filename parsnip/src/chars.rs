//! Parsers over `char` input.

use crate::outcome::{Compiled, Outcome};
use crate::parser::{literal, satisfy_labeled, token, Parser};

impl<A: Clone + 'static> Compiled<char, A> {
    /// Parses the characters of `input`.
    pub fn parse_str(&self, input: &str) -> Outcome<char, A> {
        let chars: Vec<char> = input.chars().collect();
        self.parse(&chars)
    }
}

/// Accepts exactly `c`.
pub fn char(c: char) -> Parser<char, char> {
    token(c)
}

/// Accepts exactly `s`.
pub fn string(s: &str) -> Parser<char, String> {
    let chars: Vec<char> = s.chars().collect();
    literal(&chars)
}

/// Accepts any character.
pub fn any_char() -> Parser<char, char> {
    satisfy_labeled("any character", |_| true)
}

/// Accepts any character in `chars`.
pub fn one_of(chars: &str) -> Parser<char, char> {
    let set: Vec<char> = chars.chars().collect();
    let label = format!("one of {chars:?}");
    satisfy_labeled(label, move |c| set.contains(c))
}

/// Accepts any character not in `chars`.
pub fn none_of(chars: &str) -> Parser<char, char> {
    let set: Vec<char> = chars.chars().collect();
    let label = format!("none of {chars:?}");
    satisfy_labeled(label, move |c| !set.contains(c))
}

/// An ASCII digit.
pub fn digit() -> Parser<char, char> {
    satisfy_labeled("digit", char::is_ascii_digit)
}

/// An alphabetic character.
pub fn letter() -> Parser<char, char> {
    satisfy_labeled("letter", |c: &char| c.is_alphabetic())
}

/// A whitespace character.
pub fn space() -> Parser<char, char> {
    satisfy_labeled("whitespace", |c: &char| c.is_whitespace())
}

/// Skips any amount of whitespace.
pub fn spaces() -> Parser<char, ()> {
    space().skip_many()
}
