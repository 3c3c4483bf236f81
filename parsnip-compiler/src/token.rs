use itertools::Itertools;
use std::fmt::Debug;
use std::hash::Hash;

/// The element type of the input a program parses.
///
/// Besides equality and hashing (used by dispatch tables and error sets) and an order
/// (used to break ties between error items deterministically), a token type decides what a consumed span of input turns into ([`Token::chunk`]) and how tokens are
/// rendered in error messages ([`Token::describe`]).
pub trait Token: Clone + Ord + Hash + Debug + 'static {
    /// The value produced by capturing a span of tokens.
    type Chunk: Clone + 'static;

    fn chunk(span: &[Self]) -> Self::Chunk;

    fn describe(span: &[Self]) -> String {
        span.iter().map(|t| format!("{t:?}")).join(" ")
    }
}

impl Token for char {
    type Chunk = String;

    fn chunk(span: &[Self]) -> String {
        span.iter().collect()
    }

    fn describe(span: &[Self]) -> String {
        format!("{:?}", span.iter().collect::<String>())
    }
}

impl Token for u8 {
    type Chunk = Vec<u8>;

    fn chunk(span: &[Self]) -> Vec<u8> {
        span.to_vec()
    }

    fn describe(span: &[Self]) -> String {
        format!("b{:?}", String::from_utf8_lossy(span))
    }
}
