//! Algebraic simplification of the bound expression tree.
//!
//! Every pass folds each tree bottom-up with an explicit stack. At every node the
//! children are already simplified and their [`Facts`] are known, and a small set of
//! local rewrites is applied until none matches. Passes repeat until a whole pass
//! fires no rule.

use crate::binding::Bound;
use crate::config::CompileOptions;
use crate::expr::{Expr, SeqKind, P};
use crate::token::Token;
use crate::value::{address, unit, Constant, Func1, Value};
use crate::CompileError;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// A conservative summary of how a parser can behave.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Facts {
    pub can_fail: bool,
    pub may_consume: bool,
    /// Never consumes input when it fails.
    pub atomic: bool,
}

impl Facts {
    const UNKNOWN: Facts = Facts::new(true, true, false);

    const fn new(can_fail: bool, may_consume: bool, atomic: bool) -> Self {
        Self {
            can_fail,
            may_consume,
            atomic,
        }
    }
}

const MAX_LOCAL_REWRITES: usize = 64;

struct Folder<T> {
    rewrite: bool,
    fired: usize,
    /// input node -> simplified node
    done: HashMap<usize, P<T>>,
    /// simplified node -> its facts
    facts: HashMap<usize, (P<T>, Facts)>,
    /// input nodes that continue a chain of the same kind as their parent; only the
    /// root of a chain reassociates it
    interior: HashSet<usize>,
}

impl<T: Token> Folder<T> {
    fn new(rewrite: bool) -> Self {
        Self {
            rewrite,
            fired: 0,
            done: HashMap::new(),
            facts: HashMap::new(),
            interior: HashSet::new(),
        }
    }

    fn facts_of(&self, p: &P<T>) -> Facts {
        self.facts
            .get(&address(p))
            .map(|(_, f)| *f)
            .unwrap_or(Facts::UNKNOWN)
    }

    fn local_facts(&self, e: &Expr<T>) -> Facts {
        match e {
            Expr::Pure(_) => Facts::new(false, false, true),
            Expr::Empty | Expr::Fail(_) | Expr::Eof => Facts::new(true, false, true),
            Expr::Single(..) | Expr::Satisfy(..) => Facts::new(true, true, true),
            Expr::Literal(ts, ..) => match ts.len() {
                0 => Facts::new(false, false, true),
                1 => Facts::new(true, true, true),
                _ => Facts::new(true, true, false),
            },
            Expr::Map(_, p)
            | Expr::Chunk(p)
            | Expr::MatchChunk(p)
            | Expr::Label(_, p) => self.facts_of(p),
            Expr::Seq(_, a, b) | Expr::Branch(a, b, _) => {
                let (a, b) = (self.facts_of(a), self.facts_of(b));
                Facts::new(
                    a.can_fail || b.can_fail,
                    a.may_consume || b.may_consume,
                    a.atomic && !(a.may_consume && b.can_fail) && b.atomic,
                )
            }
            Expr::Alt(a, b) => {
                let (a, b) = (self.facts_of(a), self.facts_of(b));
                Facts::new(
                    a.can_fail && (b.can_fail || !a.atomic),
                    a.may_consume || b.may_consume,
                    a.atomic && b.atomic,
                )
            }
            Expr::LookAhead(p) => Facts::new(self.facts_of(p).can_fail, false, true),
            Expr::NotFollowedBy(_) => Facts::new(true, false, true),
            Expr::Attempt(p) => {
                let p = self.facts_of(p);
                Facts::new(p.can_fail, p.may_consume, true)
            }
            Expr::Many(p) => {
                let p = self.facts_of(p);
                Facts::new(!p.atomic, p.may_consume, p.atomic)
            }
            Expr::Catch(..) | Expr::Call(_) | Expr::Lazy(_) => Facts::UNKNOWN,
        }
    }

    /// Allocates a node and records its facts. Children must already be known.
    fn mk(&mut self, e: Expr<T>) -> P<T> {
        let facts = self.local_facts(&e);
        let p = Rc::new(e);
        self.facts.insert(address(&p), (p.clone(), facts));
        p
    }

    fn fold(&mut self, root: &P<T>) -> Result<P<T>, CompileError> {
        let mut stack = vec![(root.clone(), false)];
        while let Some((p, expanded)) = stack.pop() {
            if self.done.contains_key(&address(&p)) {
                continue;
            }
            if !expanded {
                stack.push((p.clone(), true));
                for c in p.children() {
                    if continues_chain(&p, c) {
                        self.interior.insert(address(c));
                    }
                    if !self.done.contains_key(&address(c)) {
                        stack.push((c.clone(), false));
                    }
                }
                continue;
            }

            let kids: Vec<P<T>> = p
                .children()
                .into_iter()
                .map(|c| self.done.get(&address(c)).cloned().unwrap_or_else(|| c.clone()))
                .collect();
            let chained = self.interior.contains(&address(&p));
            let mut current = self.mk(p.with_children(kids));
            for _ in 0..MAX_LOCAL_REWRITES {
                match self.rewrite_once(&current, chained)? {
                    Some(next) => {
                        self.fired += 1;
                        current = next;
                    }
                    None => break,
                }
            }
            self.done.insert(address(&p), current);
        }

        Ok(self.done.get(&address(root)).cloned().unwrap_or_else(|| root.clone()))
    }

    fn rewrite_once(&mut self, p: &P<T>, chained: bool) -> Result<Option<P<T>>, CompileError> {
        if let Expr::Many(q) = p.as_ref() {
            let f = self.facts_of(q);
            if !f.can_fail && !f.may_consume {
                return Err(CompileError::NonConsumingRepeat(q.name().to_string()));
            }
        }
        if !self.rewrite {
            return Ok(None);
        }

        let res = match p.as_ref() {
            Expr::Map(g, q) => match q.as_ref() {
                Expr::Pure(x) => Some(self.mk(Expr::Pure(Constant(g.call(x.get()))))),
                Expr::Map(f, r) => Some(self.mk(Expr::Map(f.then(g), r.clone()))),
                Expr::Empty | Expr::Fail(_) => Some(q.clone()),
                _ => None,
            },
            Expr::Seq(kind, a, b) => self.rewrite_seq(kind, a, b, chained),
            Expr::Alt(..) if chained => None,
            Expr::Alt(..) => self.rewrite_alt(p),
            Expr::LookAhead(q) => match q.as_ref() {
                Expr::LookAhead(_) | Expr::Pure(_) => Some(q.clone()),
                _ => None,
            },
            Expr::NotFollowedBy(q) => match q.as_ref() {
                Expr::NotFollowedBy(r) => {
                    let ahead = self.mk(Expr::LookAhead(r.clone()));
                    Some(self.mk(Expr::Map(Func1::constant(unit()), ahead)))
                }
                _ => None,
            },
            Expr::Attempt(q) if self.facts_of(q).atomic => Some(q.clone()),
            Expr::Label(l, q) => match q.as_ref() {
                Expr::Label(_, r) => Some(self.mk(Expr::Label(l.clone(), r.clone()))),
                _ => None,
            },
            Expr::Many(q) if matches!(q.as_ref(), Expr::Empty) => {
                Some(self.mk(Expr::Pure(Constant::new(Vec::<Value>::new()))))
            }
            Expr::Chunk(q) if matches!(q.as_ref(), Expr::Pure(_)) => {
                Some(self.mk(Expr::Pure(Constant::new(T::chunk(&[])))))
            }
            _ => None,
        };
        Ok(res)
    }

    fn rewrite_seq(
        &mut self,
        kind: &SeqKind,
        a: &P<T>,
        b: &P<T>,
        chained: bool,
    ) -> Option<P<T>> {
        let fa = self.facts_of(a);
        Some(match (kind, a.as_ref(), b.as_ref()) {
            (_, Expr::Empty | Expr::Fail(_), _) => a.clone(),
            (_, _, Expr::Empty | Expr::Fail(_)) if !fa.can_fail && !fa.may_consume => b.clone(),

            (SeqKind::Right, Expr::Pure(_), _) => b.clone(),
            (SeqKind::Left, _, Expr::Pure(_)) => a.clone(),
            (SeqKind::Left, Expr::Pure(x), _) => {
                self.mk(Expr::Map(Func1::constant(x.get()), b.clone()))
            }
            (SeqKind::Right, _, Expr::Pure(y)) => {
                self.mk(Expr::Map(Func1::constant(y.get()), a.clone()))
            }
            (SeqKind::Both(f), Expr::Pure(x), _) => {
                self.mk(Expr::Map(f.bind_left(x.get()), b.clone()))
            }
            (SeqKind::Both(f), _, Expr::Pure(y)) => {
                self.mk(Expr::Map(f.bind_right(y.get()), a.clone()))
            }

            (SeqKind::Left, Expr::Seq(SeqKind::Left, ..), _)
            | (SeqKind::Right, Expr::Seq(SeqKind::Right, ..), _)
                if !chained =>
            {
                let parts = flatten(a, b, |e| match e {
                    Expr::Seq(k, x, y) if k == kind => Some((x, y)),
                    _ => None,
                });
                self.right_nested(parts, |x, y| Expr::Seq(kind.clone(), x, y))
            }
            _ => return None,
        })
    }

    fn rewrite_alt(&mut self, p: &P<T>) -> Option<P<T>> {
        let Expr::Alt(a, b) = p.as_ref() else {
            return None;
        };
        let alts = flatten(a, b, |e| match e {
            Expr::Alt(x, y) => Some((x, y)),
            _ => None,
        });

        let mut changed = matches!(a.as_ref(), Expr::Alt(..));
        let total = alts.len();
        let mut out: Vec<P<T>> = Vec::with_capacity(total);
        for (i, alt) in alts.into_iter().enumerate() {
            if matches!(alt.as_ref(), Expr::Empty) {
                changed = true;
                continue;
            }

            let merged = match (out.last().map(|l| l.as_ref()), alt.as_ref()) {
                (Some(Expr::LookAhead(x)), Expr::LookAhead(y)) => {
                    let x = self.mk(Expr::Attempt(x.clone()));
                    let either = self.mk(Expr::Alt(x, y.clone()));
                    Some(self.mk(Expr::LookAhead(either)))
                }
                (Some(Expr::NotFollowedBy(x)), Expr::NotFollowedBy(y)) => {
                    let x = self.mk(Expr::LookAhead(x.clone()));
                    let both = self.mk(Expr::Seq(SeqKind::Right, x, y.clone()));
                    Some(self.mk(Expr::NotFollowedBy(both)))
                }
                _ => None,
            };
            match merged {
                Some(m) => {
                    changed = true;
                    out.pop();
                    out.push(m);
                }
                None => out.push(alt),
            }

            let infallible = out.last().is_some_and(|l| !self.facts_of(l).can_fail);
            if infallible {
                changed |= i + 1 < total;
                break;
            }
        }

        if !changed {
            return None;
        }
        Some(match out.len() {
            0 => self.mk(Expr::Empty),
            _ => self.right_nested(out, |x, y| Expr::Alt(x, y)),
        })
    }

    fn right_nested(&mut self, parts: Vec<P<T>>, join: impl Fn(P<T>, P<T>) -> Expr<T>) -> P<T> {
        let mut parts = parts.into_iter().rev();
        let Some(mut acc) = parts.next() else {
            return self.mk(Expr::Empty);
        };
        for p in parts {
            acc = self.mk(join(p, acc));
        }
        acc
    }
}

/// Whether `child` sits inside the same chain as `parent`: the left operand of a
/// keep-left or keep-right sequence of that kind, or either operand of an alternative.
fn continues_chain<T>(parent: &P<T>, child: &P<T>) -> bool {
    match (parent.as_ref(), child.as_ref()) {
        (Expr::Seq(k @ (SeqKind::Left | SeqKind::Right), a, _), Expr::Seq(j, ..)) => {
            k == j && Rc::ptr_eq(a, child)
        }
        (Expr::Alt(..), Expr::Alt(..)) => true,
        _ => false,
    }
}

/// The operands of a chain of binary nodes, in order.
fn flatten<'a, T>(
    a: &'a P<T>,
    b: &'a P<T>,
    split: impl Fn(&'a Expr<T>) -> Option<(&'a P<T>, &'a P<T>)>,
) -> Vec<P<T>> {
    let mut res = Vec::new();
    let mut stack = vec![b, a];
    while let Some(p) = stack.pop() {
        match split(p.as_ref()) {
            Some((x, y)) => {
                stack.push(y);
                stack.push(x);
            }
            None => res.push(p.clone()),
        }
    }
    res
}

/// Simplifies the main expression and every subroutine.
pub fn optimize<T: Token>(
    mut bound: Bound<T>,
    options: &CompileOptions,
) -> Result<Bound<T>, CompileError> {
    for pass in 0..options.max_passes.max(1) {
        let mut folder = Folder::new(options.optimize);
        bound.main = folder.fold(&bound.main)?;
        for sub in bound.subroutines.values_mut() {
            sub.body = folder.fold(&sub.body)?;
        }

        log::debug!("optimizer pass {pass} applied {} rewrites", folder.fired);
        if folder.fired == 0 {
            break;
        }
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExpectedSet;
    use crate::value::{take, value, Func2};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn opt(e: P<char>) -> Result<P<char>, CompileError> {
        let bound = Bound {
            main: e,
            subroutines: BTreeMap::new(),
        };
        Ok(optimize(bound, &CompileOptions::default())?.main)
    }

    fn single(c: char) -> P<char> {
        Rc::new(Expr::Single(c, ExpectedSet::empty()))
    }

    fn pure<A: 'static>(a: A) -> P<char> {
        Rc::new(Expr::Pure(Constant::new(a)))
    }

    fn alt(a: &P<char>, b: &P<char>) -> P<char> {
        Rc::new(Expr::Alt(a.clone(), b.clone()))
    }

    #[test]
    fn maps_over_pure_are_evaluated() {
        let inc = Func1::new(|v| value(take::<i32>(v) + 1));
        let e = Rc::new(Expr::Map(inc.clone(), Rc::new(Expr::Map(inc, pure(1)))));
        match opt(e).unwrap().as_ref() {
            Expr::Pure(c) => assert_eq!(take::<i32>(c.get()), 3),
            other => panic!("expected a constant, got {other:?}"),
        }
    }

    #[test]
    fn pure_operands_become_maps() {
        let add = Func2::new(|x, y| value(take::<i32>(x) + take::<char>(y) as i32));
        let e = Rc::new(Expr::Seq(SeqKind::Both(add), pure(1), single('a')));
        let res = opt(e).unwrap();
        let Expr::Map(f, p) = res.as_ref() else {
            panic!("expected a map, got {res:?}");
        };
        assert_eq!(p, &single('a'));
        assert_eq!(take::<i32>(f.call(value('a'))), 98);
    }

    #[test]
    fn alternation_stops_at_infallible_branch() {
        let (a, b) = (single('a'), single('b'));
        let e = alt(&alt(&a, &Rc::new(Expr::Empty)), &alt(&pure(()), &b));
        let res = opt(e).unwrap();
        let Expr::Alt(x, y) = res.as_ref() else {
            panic!("expected an alternative, got {res:?}");
        };
        assert_eq!(x, &a);
        assert!(matches!(y.as_ref(), Expr::Pure(_)));
    }

    #[test]
    fn chains_become_right_nested() {
        let (a, b, c) = (single('a'), single('b'), single('c'));
        let left = Rc::new(Expr::Seq(SeqKind::Right, a.clone(), b.clone()));
        let e = Rc::new(Expr::Seq(SeqKind::Right, left, c.clone()));
        let inner = Rc::new(Expr::Seq(SeqKind::Right, b, c));
        assert_eq!(opt(e).unwrap(), Rc::new(Expr::Seq(SeqKind::Right, a, inner)));
    }

    #[test]
    fn lookaheads_collapse() {
        let a = single('a');
        let twice = Rc::new(Expr::LookAhead(Rc::new(Expr::LookAhead(a.clone()))));
        assert_eq!(opt(twice).unwrap(), Rc::new(Expr::LookAhead(a.clone())));

        let negated = Rc::new(Expr::NotFollowedBy(Rc::new(Expr::NotFollowedBy(a.clone()))));
        let res = opt(negated).unwrap();
        let Expr::Map(_, inner) = res.as_ref() else {
            panic!("expected a map, got {res:?}");
        };
        assert_eq!(inner, &Rc::new(Expr::LookAhead(a)));
    }

    #[test]
    fn atomic_attempts_are_erased() {
        let a = single('a');
        assert_eq!(opt(Rc::new(Expr::Attempt(a.clone()))).unwrap(), a);

        let two: Rc<[char]> = Rc::from(vec!['a', 'b']);
        let lit = Rc::new(Expr::Literal(two, Constant::unit(), ExpectedSet::empty()));
        let kept = Rc::new(Expr::Attempt(lit));
        assert_eq!(opt(kept.clone()).unwrap(), kept);
    }

    #[test]
    fn repeating_pure_is_rejected() {
        let e = Rc::new(Expr::Many(pure(())));
        assert!(matches!(opt(e), Err(CompileError::NonConsumingRepeat(_))));
    }

    #[test]
    fn repeating_empty_yields_no_items() {
        let e = Rc::new(Expr::Many(Rc::new(Expr::Empty)));
        match opt(e).unwrap().as_ref() {
            Expr::Pure(c) => assert!(take::<Vec<Value>>(c.get()).is_empty()),
            other => panic!("expected a constant, got {other:?}"),
        }
    }
}
