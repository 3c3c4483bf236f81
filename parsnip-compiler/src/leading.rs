//! Leading-token analysis.
//!
//! A parser's leading set is the set of tokens one of which must come first for the
//! parser to succeed. Parsers whose first token is not in their leading set fail
//! without consuming input, which is what lets an alternation jump straight to the
//! right branch.

use crate::binding::Subroutine;
use crate::error::ExpectedSet;
use crate::expr::{Expr, P};
use crate::token::Token;
use std::collections::BTreeMap;

/// How many subroutine calls the analysis follows before giving up.
const MAX_CALL_DEPTH: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lead<T> {
    pub tokens: Vec<T>,
    /// What the parser reports as expected when it fails on its first token.
    pub expected: ExpectedSet<T>,
}

/// Computes the leading set of `p`, or `None` when it is not statically known.
pub fn lead<T: Token>(p: &P<T>, subroutines: &BTreeMap<u32, Subroutine<T>>) -> Option<Lead<T>> {
    let mut tokens: Vec<T> = Vec::new();
    let mut expected = ExpectedSet::empty();
    // (node, whether an enclosing label decides the expectation, calls followed)
    let mut work = vec![(p.clone(), false, Vec::<u32>::new())];

    while let Some((p, labelled, calls)) = work.pop() {
        match p.as_ref() {
            Expr::Single(t, e) => absorb(&mut tokens, &mut expected, labelled, t, e),
            Expr::Literal(ts, _, e) => match ts.first() {
                Some(t) => absorb(&mut tokens, &mut expected, labelled, t, e),
                None => return None,
            },
            Expr::Seq(_, a, b) => {
                let first = if matches!(a.as_ref(), Expr::Pure(_)) { b } else { a };
                work.push((first.clone(), labelled, calls));
            }
            Expr::Map(_, q)
            | Expr::Attempt(q)
            | Expr::Chunk(q)
            | Expr::MatchChunk(q)
            | Expr::Branch(q, _, _) => work.push((q.clone(), labelled, calls)),
            Expr::Alt(a, b) => {
                work.push((b.clone(), labelled, calls.clone()));
                work.push((a.clone(), labelled, calls));
            }
            Expr::Label(l, q) => {
                if let (Some(l), false) = (l, labelled) {
                    expected.extend(&ExpectedSet::label(l.clone()));
                }
                work.push((q.clone(), true, calls));
            }
            Expr::Call(s) => {
                if calls.contains(&s.label) || calls.len() >= MAX_CALL_DEPTH {
                    return None;
                }
                let body = &subroutines.get(&s.label)?.body;
                let mut calls = calls;
                calls.push(s.label);
                work.push((body.clone(), labelled, calls));
            }
            Expr::Lazy(l) => {
                let target = l.force().ok()?;
                work.push((target, labelled, calls));
            }
            Expr::Pure(_)
            | Expr::Fail(_)
            | Expr::Empty
            | Expr::Satisfy(..)
            | Expr::Eof
            | Expr::LookAhead(_)
            | Expr::NotFollowedBy(_)
            | Expr::Many(_)
            | Expr::Catch(..) => return None,
        }
    }

    (!tokens.is_empty()).then_some(Lead { tokens, expected })
}

fn absorb<T: Token>(
    tokens: &mut Vec<T>,
    expected: &mut ExpectedSet<T>,
    labelled: bool,
    t: &T,
    e: &ExpectedSet<T>,
) {
    if !tokens.contains(t) {
        tokens.push(t.clone());
    }
    if !labelled {
        expected.extend(e);
    }
}
