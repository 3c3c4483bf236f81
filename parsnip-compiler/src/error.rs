//! Parse errors and the longest-match rule used to combine them.
//!
//! A failing run produces many candidate errors: one for every alternative that was
//! tried and discarded. They are folded together with [`ParseError::merge`], which keeps
//! the error that got furthest into the input and, at equal offsets, unions what was
//! expected there.

use crate::token::Token;
use itertools::Itertools;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Something that was expected or found at an error position.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorItem<T> {
    Tokens(Vec<T>),
    Label(String),
    EndOfInput,
}

impl<T: Token> ErrorItem<T> {
    /// How much input the item covers. Larger items are more specific.
    pub fn span(&self) -> usize {
        match self {
            ErrorItem::Tokens(t) => t.len(),
            ErrorItem::Label(_) | ErrorItem::EndOfInput => 1,
        }
    }

    /// Labels name something the grammar chose to report, so they outrank raw tokens
    /// of the same span.
    fn rank(&self) -> u8 {
        match self {
            ErrorItem::Label(_) => 2,
            ErrorItem::Tokens(_) => 1,
            ErrorItem::EndOfInput => 0,
        }
    }

    /// Picks the more specific of two unexpected items: the larger span, then the higher
    /// rank, then the larger contents. The choice does not depend on the argument order.
    fn most_specific(self, other: Self) -> Self {
        let order = self
            .span()
            .cmp(&other.span())
            .then_with(|| self.rank().cmp(&other.rank()))
            .then_with(|| match (&self, &other) {
                (ErrorItem::Label(a), ErrorItem::Label(b)) => a.cmp(b),
                (ErrorItem::Tokens(a), ErrorItem::Tokens(b)) => a.cmp(b),
                _ => Ordering::Equal,
            });
        match order {
            Ordering::Less => other,
            Ordering::Greater | Ordering::Equal => self,
        }
    }
}

impl<T: Token> Display for ErrorItem<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorItem::Tokens(t) => write!(f, "{}", T::describe(t)),
            ErrorItem::Label(l) => write!(f, "{l}"),
            ErrorItem::EndOfInput => write!(f, "end of input"),
        }
    }
}

/// The set of items a failing instruction would have accepted.
///
/// Sets are shared between the instruction that raises them and every error built from
/// them, so cloning is cheap. A set may be a prefix of a longer shared list, which lets
/// a dispatch table hand out the expectations of its first `k` alternatives without a
/// copy per alternative. Equality is set equality.
pub struct ExpectedSet<T> {
    items: Rc<Vec<ErrorItem<T>>>,
    len: usize,
}

impl<T> Clone for ExpectedSet<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            len: self.len,
        }
    }
}

impl<T> Default for ExpectedSet<T> {
    fn default() -> Self {
        Self::from_vec(Vec::new())
    }
}

impl<T: PartialEq> PartialEq for ExpectedSet<T> {
    fn eq(&self, other: &Self) -> bool {
        (Rc::ptr_eq(&self.items, &other.items) && self.len == other.len)
            || (self.len == other.len && self.items().iter().all(|i| other.contains(i)))
    }
}

impl<T: Eq> Eq for ExpectedSet<T> {}

// Consistent with set equality: equal sets have equal lengths.
impl<T> Hash for ExpectedSet<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len.hash(state)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ExpectedSet<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.items[..self.len].iter()).finish()
    }
}

impl<T> ExpectedSet<T> {
    fn from_vec(items: Vec<ErrorItem<T>>) -> Self {
        Self {
            len: items.len(),
            items: Rc::new(items),
        }
    }
}

impl<T: PartialEq> ExpectedSet<T> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(item: ErrorItem<T>) -> Self {
        Self::from_vec(vec![item])
    }

    pub fn label(label: impl Into<String>) -> Self {
        Self::single(ErrorItem::Label(label.into()))
    }

    pub fn from_items(items: impl IntoIterator<Item = ErrorItem<T>>) -> Self {
        let mut res = Vec::new();
        for i in items {
            if !res.contains(&i) {
                res.push(i);
            }
        }
        Self::from_vec(res)
    }

    pub fn items(&self) -> &[ErrorItem<T>] {
        &self.items[..self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, item: &ErrorItem<T>) -> bool {
        self.items().contains(item)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn union(&self, other: &Self) -> Self
    where
        T: Clone,
    {
        let mut res = self.clone();
        res.extend(other);
        res
    }

    /// Adds the items of `other` that are missing. The item list is copied only if it
    /// is shared or this set is a prefix of it.
    pub fn extend(&mut self, other: &Self)
    where
        T: Clone,
    {
        if other.is_empty() || (Rc::ptr_eq(&self.items, &other.items) && other.len <= self.len) {
            return;
        }
        if self.is_empty() {
            *self = other.clone();
            return;
        }
        let missing = other
            .items()
            .iter()
            .filter(|i| !self.contains(i))
            .cloned()
            .collect_vec();
        if missing.is_empty() {
            return;
        }
        if self.len < self.items.len() {
            *self = Self::from_vec(self.items().to_vec());
        }
        Rc::make_mut(&mut self.items).extend(missing);
        self.len = self.items.len();
    }

    /// The running unions of `sets`: the `k`-th result holds the items of the first `k`
    /// sets, and the last one holds all of them. Every result shares one list.
    pub fn prefix_unions(sets: &[ExpectedSet<T>]) -> Vec<ExpectedSet<T>>
    where
        T: Clone + Eq + Hash,
    {
        let mut all: Vec<ErrorItem<T>> = Vec::new();
        let mut seen = HashSet::new();
        let mut lens = vec![0];
        for set in sets {
            for i in set.items() {
                if seen.insert(i) {
                    all.push(i.clone());
                }
            }
            lens.push(all.len());
        }
        let items = Rc::new(all);
        lens.into_iter()
            .map(|len| ExpectedSet {
                items: items.clone(),
                len,
            })
            .collect()
    }
}

impl<T: Token> Display for ExpectedSet<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut rendered = self.items().iter().map(ToString::to_string).sorted().dedup();
        let Some(first) = rendered.next() else {
            return Ok(());
        };
        let rest = rendered.collect_vec();
        match rest.split_last() {
            None => write!(f, "{first}"),
            Some((last, [])) => write!(f, "{first} or {last}"),
            Some((last, middle)) => {
                write!(f, "{first}, {}, or {last}", middle.iter().join(", "))
            }
        }
    }
}

/// A user supplied error value carried by a fancy error, compared by identity.
#[derive(Clone)]
pub struct CustomError(pub Rc<dyn Error>);
identity_eq!(CustomError);

impl CustomError {
    pub fn new(e: impl Error + 'static) -> Self {
        Self(Rc::new(e))
    }
}

/// Rewrites an error on its way out of a region.
pub struct ErrorMap<T>(Rc<dyn Fn(ParseError<T>) -> ParseError<T>>);
identity_eq!(ErrorMap<T>);

impl<T> Clone for ErrorMap<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> ErrorMap<T> {
    pub fn new(f: impl Fn(ParseError<T>) -> ParseError<T> + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn apply(&self, e: ParseError<T>) -> ParseError<T> {
        (self.0)(e)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FancyItem {
    Message(String),
    Custom(CustomError),
}

impl FancyItem {
    fn sort_key(&self) -> (u8, String, usize) {
        match self {
            FancyItem::Message(m) => (0, m.clone(), 0),
            FancyItem::Custom(c) => (1, c.0.to_string(), crate::value::address(&c.0)),
        }
    }
}

impl Display for FancyItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FancyItem::Message(m) => write!(f, "{m}"),
            FancyItem::Custom(c) => write!(f, "{}", c.0),
        }
    }
}

/// The ways an explicit `fail` can go wrong.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Failure {
    Message(Vec<String>),
    Unexpected(String),
    Custom(CustomError),
}

impl Failure {
    /// The error this failure raises at `offset`.
    pub fn at<T: Token>(&self, offset: usize) -> ParseError<T> {
        match self {
            Failure::Message(ms) => ParseError::Fancy {
                offset,
                items: ms.iter().cloned().map(FancyItem::Message).collect(),
            },
            Failure::Unexpected(u) => ParseError::Trivial {
                offset,
                unexpected: Some(ErrorItem::Label(u.clone())),
                expected: ExpectedSet::empty(),
            },
            Failure::Custom(c) => ParseError::Fancy {
                offset,
                items: vec![FancyItem::Custom(c.clone())],
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<T> {
    /// Something unexpected was found where something else was expected.
    Trivial {
        offset: usize,
        unexpected: Option<ErrorItem<T>>,
        expected: ExpectedSet<T>,
    },
    /// Messages and custom errors raised explicitly by the grammar.
    Fancy { offset: usize, items: Vec<FancyItem> },
}

impl<T: Token> ParseError<T> {
    pub fn offset(&self) -> usize {
        match self {
            ParseError::Trivial { offset, .. } | ParseError::Fancy { offset, .. } => *offset,
        }
    }

    pub fn unexpected(&self) -> Option<&ErrorItem<T>> {
        match self {
            ParseError::Trivial { unexpected, .. } => unexpected.as_ref(),
            ParseError::Fancy { .. } => None,
        }
    }

    pub fn expected(&self) -> Option<&ExpectedSet<T>> {
        match self {
            ParseError::Trivial { expected, .. } => Some(expected),
            ParseError::Fancy { .. } => None,
        }
    }

    pub fn is_trivial(&self) -> bool {
        matches!(self, ParseError::Trivial { .. })
    }

    /// Replaces what a trivial error expected. Fancy errors are returned unchanged.
    pub fn with_expected(self, expected: ExpectedSet<T>) -> Self {
        match self {
            ParseError::Trivial {
                offset, unexpected, ..
            } => ParseError::Trivial {
                offset,
                unexpected,
                expected,
            },
            fancy => fancy,
        }
    }

    /// Combines two errors by the longest-match rule.
    ///
    /// The error with the larger offset wins outright. At equal offsets a fancy error
    /// beats a trivial one, two fancy errors union their messages, and two trivial
    /// errors union their expected sets and keep the more specific unexpected item.
    /// `merge` is commutative and associative.
    pub fn merge(self, other: Self) -> Self {
        match self.offset().cmp(&other.offset()) {
            Ordering::Greater => return self,
            Ordering::Less => return other,
            Ordering::Equal => {}
        }

        match (self, other) {
            (ParseError::Fancy { offset, mut items }, ParseError::Fancy { items: theirs, .. }) => {
                items.extend(theirs);
                items.sort_by_cached_key(FancyItem::sort_key);
                items.dedup();
                ParseError::Fancy { offset, items }
            }
            (fancy @ ParseError::Fancy { .. }, ParseError::Trivial { .. })
            | (ParseError::Trivial { .. }, fancy @ ParseError::Fancy { .. }) => fancy,
            (
                ParseError::Trivial {
                    offset,
                    unexpected: u1,
                    expected: e1,
                },
                ParseError::Trivial {
                    unexpected: u2,
                    expected: e2,
                    ..
                },
            ) => ParseError::Trivial {
                offset,
                unexpected: match (u1, u2) {
                    (Some(a), Some(b)) => Some(a.most_specific(b)),
                    (a, b) => a.or(b),
                },
                expected: {
                    // grow the larger set, usually the accumulated one, in place
                    let (mut big, small) = if e1.len() >= e2.len() { (e1, e2) } else { (e2, e1) };
                    big.extend(&small);
                    big
                },
            },
        }
    }

    /// [`merge`](Self::merge) lifted over optional errors.
    pub fn merge_opt(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.merge(b)),
            (a, b) => a.or(b),
        }
    }
}

impl<T: Token> Display for ParseError<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Trivial {
                offset,
                unexpected,
                expected,
            } => {
                write!(f, "at offset {offset}:")?;
                if let Some(u) = unexpected {
                    write!(f, " unexpected {u}")?;
                    if !expected.is_empty() {
                        write!(f, ",")?;
                    }
                }
                if !expected.is_empty() {
                    write!(f, " expected {expected}")?;
                }
                if unexpected.is_none() && expected.is_empty() {
                    write!(f, " unknown parse error")?;
                }
                Ok(())
            }
            ParseError::Fancy { offset, items } => {
                write!(f, "at offset {offset}: {}", items.iter().join("; "))
            }
        }
    }
}

impl<T: Token> Error for ParseError<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn trivial(offset: usize, unexpected: &str, expected: &[&str]) -> ParseError<char> {
        ParseError::Trivial {
            offset,
            unexpected: Some(ErrorItem::Tokens(unexpected.chars().collect())),
            expected: ExpectedSet::from_items(expected.iter().map(|e| ErrorItem::Label(e.to_string()))),
        }
    }

    #[test]
    fn furthest_error_wins() {
        let a = trivial(5, "x", &["a"]);
        let b = trivial(3, "y", &["b"]);
        assert_eq!(a.clone().merge(b.clone()), a);
        assert_eq!(b.merge(a.clone()), a);
    }

    #[test]
    fn equal_offsets_union_expectations() {
        let a = trivial(2, "x", &["a", "b"]);
        let b = trivial(2, "xy", &["c"]);
        let merged = a.clone().merge(b.clone());
        assert_eq!(merged, trivial(2, "xy", &["c", "b", "a"]));
        assert_eq!(merged, b.merge(a));
    }

    #[test]
    fn merge_is_associative() {
        let a = trivial(1, "p", &["a"]);
        let b = trivial(1, "q", &["b"]);
        let c = Failure::Message(vec!["boom".into()]).at::<char>(1);
        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = a.merge(b.merge(c));
        assert_eq!(left, right);
    }

    #[test]
    fn fancy_beats_trivial_at_same_offset() {
        let fancy = Failure::Message(vec!["nope".into()]).at::<char>(4);
        assert_eq!(trivial(4, "z", &["q"]).merge(fancy.clone()), fancy);
        assert_eq!(trivial(5, "z", &["q"]).merge(fancy), trivial(5, "z", &["q"]));
    }

    #[test]
    fn labels_outrank_tokens_of_the_same_span() {
        let named: ParseError<char> = Failure::Unexpected("thing".into()).at(0);
        let raw = trivial(0, "y", &["'z'"]);
        for merged in [named.clone().merge(raw.clone()), raw.clone().merge(named)] {
            assert_eq!(merged.unexpected(), Some(&ErrorItem::Label("thing".into())));
        }

        let eof: ParseError<char> = ParseError::Trivial {
            offset: 0,
            unexpected: Some(ErrorItem::EndOfInput),
            expected: ExpectedSet::empty(),
        };
        assert_eq!(eof.clone().merge(raw.clone()).unexpected(), raw.unexpected());
        assert_eq!(raw.clone().merge(eof).unexpected(), raw.unexpected());

        let other = trivial(0, "a", &[]);
        assert_eq!(other.clone().merge(raw.clone()).unexpected(), raw.unexpected());
        assert_eq!(raw.clone().merge(other).unexpected(), raw.unexpected());
    }

    #[test]
    fn extending_a_shared_set_leaves_the_original_alone() {
        let original = ExpectedSet::<char>::label("a");
        let mut grown = original.clone();
        grown.extend(&ExpectedSet::label("b"));
        grown.extend(&ExpectedSet::label("a"));
        assert_eq!(original.len(), 1);
        assert_eq!(grown.len(), 2);
        assert!(grown.contains(&ErrorItem::Label("b".into())));
    }

    #[test]
    fn prefix_unions_share_their_items() {
        let labels = |ls: &[&str]| {
            ExpectedSet::<char>::from_items(ls.iter().map(|l| ErrorItem::Label(l.to_string())))
        };
        let sets = ["a", "b", "a", "c"].map(|l| ExpectedSet::<char>::label(l));
        let prefixes = ExpectedSet::prefix_unions(&sets);
        assert_eq!(prefixes.len(), 5);
        assert!(prefixes[0].is_empty());
        assert_eq!(prefixes[2], labels(&["a", "b"]));
        assert_eq!(prefixes[3], prefixes[2]);
        assert_eq!(prefixes[4].len(), 3);

        // growing a prefix must not show the items that follow it in the shared list
        let mut grown = prefixes[1].clone();
        grown.extend(&ExpectedSet::label("d"));
        assert_eq!(grown, labels(&["a", "d"]));
        assert_eq!(prefixes[4].len(), 3);
        assert!(!prefixes[4].contains(&ErrorItem::Label("d".into())));
    }

    #[test]
    fn display_lists_alternatives() {
        let e = trivial(3, "x", &["b", "a", "c"]);
        assert_eq!(e.to_string(), "at offset 3: unexpected \"x\", expected a, b, or c");
        let eof: ParseError<char> = ParseError::Trivial {
            offset: 0,
            unexpected: Some(ErrorItem::EndOfInput),
            expected: ExpectedSet::single(ErrorItem::Tokens(vec!['n', 'u', 'l', 'l'])),
        };
        assert_eq!(eof.to_string(), "at offset 0: unexpected end of input, expected \"null\"");
    }
}
