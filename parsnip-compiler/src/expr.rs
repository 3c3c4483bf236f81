//! The untyped expression tree built by the combinator front-end.
//!
//! Nodes are shared through [`P`], so a grammar is a graph: a combinator used in two
//! places is one node with two parents, and recursive grammars close their cycles
//! through [`Expr::Lazy`]. [`bind`](crate::binding::bind) turns that graph back into a
//! tree plus a table of subroutines.

use crate::error::{ErrorMap, ExpectedSet, Failure};
use crate::token::Token;
use crate::value::{Constant, Func1, Func2, Pred};
use crate::CompileError;
use std::cell::{OnceCell, RefCell};
use std::rc::Rc;

pub type P<T> = Rc<Expr<T>>;

/// What a sequence keeps of its two results.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SeqKind {
    /// Combines both results.
    Both(Func2),
    Left,
    Right,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CatchMode<T> {
    /// Turns a failure into an `Err` value after rewinding to where the region started.
    Capture,
    /// Rewrites the error and keeps failing.
    Rewrite(ErrorMap<T>),
}

/// A reference to an extracted subroutine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubRef {
    pub label: u32,
    pub recursive: bool,
}

/// A node of a grammar.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr<T> {
    /// Succeeds with a constant without consuming input.
    Pure(Constant),
    Fail(Failure),
    /// Fails without an error message.
    Empty,
    Satisfy(Pred<T>, ExpectedSet<T>),
    Single(T, ExpectedSet<T>),
    /// A sequence of tokens, producing the constant.
    Literal(Rc<[T]>, Constant, ExpectedSet<T>),
    Eof,

    Map(Func1, P<T>),
    Seq(SeqKind, P<T>, P<T>),
    /// Tries the second parser when the first fails without consuming input.
    Alt(P<T>, P<T>),
    /// Runs the first parser, which yields an `Either`. A `Left(x)` runs the second
    /// parser and combines `x` with its result, a `Right(y)` is returned as is.
    Branch(P<T>, P<T>, Func2),

    LookAhead(P<T>),
    NotFollowedBy(P<T>),
    /// Rewinds the input when the parser fails.
    Attempt(P<T>),
    Many(P<T>),
    Chunk(P<T>),
    /// Pairs the consumed input with the result.
    MatchChunk(P<T>),
    /// `None` hides the parser from error messages.
    Label(Option<String>, P<T>),
    Catch(P<T>, CatchMode<T>),

    Lazy(LazyRef<T>),
    /// Only present after binding.
    Call(SubRef),
}

impl<T: Token> Expr<T> {
    pub fn children(&self) -> Vec<&P<T>> {
        match self {
            Expr::Pure(_)
            | Expr::Fail(_)
            | Expr::Empty
            | Expr::Satisfy(..)
            | Expr::Single(..)
            | Expr::Literal(..)
            | Expr::Eof
            | Expr::Lazy(_)
            | Expr::Call(_) => vec![],
            Expr::Map(_, p)
            | Expr::LookAhead(p)
            | Expr::NotFollowedBy(p)
            | Expr::Attempt(p)
            | Expr::Many(p)
            | Expr::Chunk(p)
            | Expr::MatchChunk(p)
            | Expr::Label(_, p)
            | Expr::Catch(p, _) => vec![p],
            Expr::Seq(_, a, b) | Expr::Alt(a, b) | Expr::Branch(a, b, _) => vec![a, b],
        }
    }

    /// Rebuilds this node over new children, given in the order of [`Expr::children`].
    pub fn with_children(&self, kids: Vec<P<T>>) -> Expr<T> {
        let mut kids = kids.into_iter();
        let mut next = || kids.next().unwrap_or_else(|| Rc::new(Expr::Empty));
        match self {
            Expr::Map(f, _) => Expr::Map(f.clone(), next()),
            Expr::LookAhead(_) => Expr::LookAhead(next()),
            Expr::NotFollowedBy(_) => Expr::NotFollowedBy(next()),
            Expr::Attempt(_) => Expr::Attempt(next()),
            Expr::Many(_) => Expr::Many(next()),
            Expr::Chunk(_) => Expr::Chunk(next()),
            Expr::MatchChunk(_) => Expr::MatchChunk(next()),
            Expr::Label(l, _) => Expr::Label(l.clone(), next()),
            Expr::Catch(_, m) => Expr::Catch(next(), m.clone()),
            Expr::Seq(k, _, _) => {
                let a = next();
                Expr::Seq(k.clone(), a, next())
            }
            Expr::Alt(_, _) => {
                let a = next();
                Expr::Alt(a, next())
            }
            Expr::Branch(_, _, f) => {
                let a = next();
                Expr::Branch(a, next(), f.clone())
            }
            leaf => leaf.clone(),
        }
    }

    /// A primitive matcher: no children and not a forward reference.
    pub fn is_leaf(&self) -> bool {
        self.children().is_empty() && !matches!(self, Expr::Lazy(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Expr::Pure(_) => "pure",
            Expr::Fail(_) => "fail",
            Expr::Empty => "empty",
            Expr::Satisfy(..) => "satisfy",
            Expr::Single(..) => "token",
            Expr::Literal(..) => "literal",
            Expr::Eof => "eof",
            Expr::Map(..) => "map",
            Expr::Seq(..) => "sequence",
            Expr::Alt(..) => "alternative",
            Expr::Branch(..) => "branch",
            Expr::LookAhead(_) => "look_ahead",
            Expr::NotFollowedBy(_) => "not_followed_by",
            Expr::Attempt(_) => "attempt",
            Expr::Many(_) => "many",
            Expr::Chunk(_) => "chunk",
            Expr::MatchChunk(_) => "with_chunk",
            Expr::Label(..) => "label",
            Expr::Catch(..) => "catch",
            Expr::Lazy(_) => "lazy",
            Expr::Call(_) => "call",
        }
    }
}

// Grammars can be far deeper than the native stack, so nodes are torn down with a
// work list instead of recursively.
impl<T> Drop for Expr<T> {
    fn drop(&mut self) {
        let mut work = Vec::new();
        detach_children(self, &mut work);
        while let Some(mut e) = work.pop() {
            detach_children(&mut e, &mut work);
        }
    }
}

/// Moves the contents of every uniquely owned child of `e` into `work`, leaving an
/// `Empty` node behind. Shared children are only released by the caller's drop.
fn detach_children<T>(e: &mut Expr<T>, work: &mut Vec<Expr<T>>) {
    let mut detach = |c: &mut P<T>| {
        if let Some(inner) = Rc::get_mut(c) {
            if !matches!(inner, Expr::Empty) {
                work.push(std::mem::replace(inner, Expr::Empty));
            }
        }
    };
    match e {
        Expr::Map(_, p)
        | Expr::LookAhead(p)
        | Expr::NotFollowedBy(p)
        | Expr::Attempt(p)
        | Expr::Many(p)
        | Expr::Chunk(p)
        | Expr::MatchChunk(p)
        | Expr::Label(_, p)
        | Expr::Catch(p, _) => detach(p),
        Expr::Seq(_, a, b) | Expr::Alt(a, b) | Expr::Branch(a, b, _) => {
            detach(a);
            detach(b);
        }
        Expr::Pure(_)
        | Expr::Fail(_)
        | Expr::Empty
        | Expr::Satisfy(..)
        | Expr::Single(..)
        | Expr::Literal(..)
        | Expr::Eof
        | Expr::Lazy(_)
        | Expr::Call(_) => {}
    }
}

type Supplier<T> = Box<dyn FnOnce() -> P<T>>;

/// A forward reference to an expression, forced at most once.
///
/// Created either from a supplier closure (recursive grammars) or empty, to be
/// [`define`](LazyCell::define)d later.
pub struct LazyCell<T> {
    supplier: RefCell<Option<Supplier<T>>>,
    target: OnceCell<P<T>>,
}

impl<T> LazyCell<T> {
    pub fn new(supplier: impl FnOnce() -> P<T> + 'static) -> Self {
        Self {
            supplier: RefCell::new(Some(Box::new(supplier))),
            target: OnceCell::new(),
        }
    }

    pub fn undefined() -> Self {
        Self {
            supplier: RefCell::new(None),
            target: OnceCell::new(),
        }
    }

    /// Sets the target. Returns false if it was already set.
    pub fn define(&self, target: P<T>) -> bool {
        self.supplier.borrow_mut().take();
        self.target.set(target).is_ok()
    }

    pub fn is_defined(&self) -> bool {
        self.target.get().is_some() || self.supplier.borrow().is_some()
    }

    /// The target, running the supplier the first time.
    pub fn force(&self) -> Result<P<T>, CompileError> {
        if let Some(t) = self.target.get() {
            return Ok(t.clone());
        }
        let supplier = self.supplier.borrow_mut().take();
        match supplier {
            Some(s) => Ok(self.target.get_or_init(s).clone()),
            None => Err(CompileError::UndefinedReference),
        }
    }
}

pub struct LazyRef<T>(pub Rc<LazyCell<T>>);
identity_eq!(LazyRef<T>);

impl<T> Clone for LazyRef<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> LazyRef<T> {
    pub fn new(cell: LazyCell<T>) -> Self {
        Self(Rc::new(cell))
    }

    pub fn force(&self) -> Result<P<T>, CompileError> {
        self.0.force()
    }
}

/// Follows a chain of lazy references to the first real node.
pub fn resolve<T: Token>(p: &P<T>) -> Result<P<T>, CompileError> {
    let mut seen = Vec::new();
    let mut current = p.clone();
    while let Expr::Lazy(l) = current.as_ref() {
        if seen.contains(l) {
            return Err(CompileError::CyclicReference);
        }
        seen.push(l.clone());
        current = l.force()?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_forces_once() {
        let count = Rc::new(std::cell::Cell::new(0));
        let c = count.clone();
        let cell = LazyRef::new(LazyCell::new(move || {
            c.set(c.get() + 1);
            Rc::new(Expr::<char>::Eof)
        }));
        let a = cell.force().unwrap();
        let b = cell.force().unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn undefined_and_cyclic_references_are_rejected() {
        let undefined: P<char> = Rc::new(Expr::Lazy(LazyRef::new(LazyCell::undefined())));
        assert!(matches!(resolve(&undefined), Err(CompileError::UndefinedReference)));

        let cell = LazyRef::new(LazyCell::<char>::undefined());
        let cyclic = Rc::new(Expr::Lazy(cell.clone()));
        cell.0.define(cyclic.clone());
        assert!(matches!(resolve(&cyclic), Err(CompileError::CyclicReference)));
    }

    #[test]
    fn with_children_keeps_the_shape() {
        let a: P<char> = Rc::new(Expr::Eof);
        let b: P<char> = Rc::new(Expr::Empty);
        let seq = Expr::Seq(SeqKind::Left, a.clone(), b.clone());
        let rebuilt = seq.with_children(vec![b.clone(), a.clone()]);
        assert_eq!(rebuilt, Expr::Seq(SeqKind::Left, b, a));
    }

    #[test]
    fn deep_trees_drop_without_overflow() {
        let shared: P<char> = Rc::new(Expr::Eof);
        let mut p = shared.clone();
        for i in 0..200_000 {
            p = match i % 3 {
                0 => Rc::new(Expr::Attempt(p)),
                1 => Rc::new(Expr::Seq(SeqKind::Right, p, shared.clone())),
                _ => Rc::new(Expr::Alt(shared.clone(), p)),
            };
        }
        drop(p);
        assert_eq!(Rc::strong_count(&shared), 1);
    }
}
