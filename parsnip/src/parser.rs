//! The typed combinator API.
//!
//! A [`Parser<T, A>`] is an expression tree over tokens `T` that, when it succeeds,
//! produces an `A`. The tree itself is untyped; the type parameter makes sure every
//! value that flows through the machine is taken out as what it was put in as.

use crate::outcome::Compiled;
use parsnip_compiler::expr::{LazyCell, LazyRef, SeqKind};
use parsnip_compiler::{
    take, value, CatchMode, CompileError, CompileOptions, Constant, CustomError, Either,
    ErrorItem, ErrorMap, ExpectedSet, Expr, Failure, Func1, Func2, ParseError, Pred, Token, Value,
    P,
};
use std::error::Error;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::rc::Rc;

/// A parser over tokens `T` producing an `A`.
pub struct Parser<T, A> {
    expr: P<T>,
    _marker: PhantomData<fn() -> A>,
}

impl<T, A> Clone for Parser<T, A> {
    fn clone(&self) -> Self {
        Self {
            expr: self.expr.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Token, A> Debug for Parser<T, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parser({})", self.expr.name())
    }
}

fn node<T, A>(e: Expr<T>) -> Parser<T, A> {
    Parser {
        expr: Rc::new(e),
        _marker: PhantomData,
    }
}

/// Lifts a function over typed values to one over machine values.
fn func1<A: Clone + 'static, B: 'static>(f: impl Fn(A) -> B + 'static) -> Func1 {
    Func1::new(move |v| value(f(take::<A>(v))))
}

fn func2<A: Clone + 'static, B: Clone + 'static, C: 'static>(
    f: impl Fn(A, B) -> C + 'static,
) -> Func2 {
    Func2::new(move |x, y| value(f(take::<A>(x), take::<B>(y))))
}

fn prepend<A>(x: A, mut xs: Vec<A>) -> Vec<A> {
    xs.insert(0, x);
    xs
}

/// Accepts exactly `t`.
pub fn token<T: Token>(t: T) -> Parser<T, T> {
    let expected = ExpectedSet::single(ErrorItem::Tokens(vec![t.clone()]));
    node(Expr::Single(t, expected))
}

/// Accepts any token for which `pred` holds. Failures expect nothing in particular;
/// use [`satisfy_labeled`] or [`Parser::label`] to name what was expected.
pub fn satisfy<T: Token>(pred: impl Fn(&T) -> bool + 'static) -> Parser<T, T> {
    node(Expr::Satisfy(Pred::new(pred), ExpectedSet::empty()))
}

/// Like [`satisfy`], reporting `label` as expected on failure.
pub fn satisfy_labeled<T: Token>(
    label: impl Into<String>,
    pred: impl Fn(&T) -> bool + 'static,
) -> Parser<T, T> {
    node(Expr::Satisfy(Pred::new(pred), ExpectedSet::label(label)))
}

/// Accepts the sequence `tokens` and produces it as a chunk.
pub fn literal<T: Token>(tokens: &[T]) -> Parser<T, T::Chunk> {
    let expected = ExpectedSet::single(ErrorItem::Tokens(tokens.to_vec()));
    node(Expr::Literal(
        tokens.into(),
        Constant::new(T::chunk(tokens)),
        expected,
    ))
}

/// Succeeds with `a` without consuming input.
pub fn pure<T: Token, A: Clone + 'static>(a: A) -> Parser<T, A> {
    node(Expr::Pure(Constant::new(a)))
}

/// Fails with a message.
pub fn fail<T: Token, A>(message: impl Into<String>) -> Parser<T, A> {
    node(Expr::Fail(Failure::Message(vec![message.into()])))
}

/// Fails, reporting `item` as what was unexpected.
pub fn unexpected<T: Token, A>(item: impl Into<String>) -> Parser<T, A> {
    node(Expr::Fail(Failure::Unexpected(item.into())))
}

/// Fails with a caller-supplied error.
pub fn fail_custom<T: Token, A>(error: impl Error + 'static) -> Parser<T, A> {
    node(Expr::Fail(Failure::Custom(CustomError::new(error))))
}

/// Fails without saying anything.
pub fn empty<T: Token, A>() -> Parser<T, A> {
    node(Expr::Empty)
}

/// Succeeds only at the end of the input.
pub fn eof<T: Token>() -> Parser<T, ()> {
    node(Expr::Eof)
}

/// The first of `parsers` that succeeds, or [`empty`] if there are none.
pub fn choice<T: Token, A: Clone + 'static>(
    parsers: impl IntoIterator<Item = Parser<T, A>>,
) -> Parser<T, A> {
    parsers
        .into_iter()
        .reduce(|a, b| a.or(b))
        .unwrap_or_else(empty)
}

/// A parser that is only built when the grammar is compiled.
pub fn lazy<T: Token, A>(f: impl FnOnce() -> Parser<T, A> + 'static) -> Parser<T, A> {
    node(Expr::Lazy(LazyRef::new(LazyCell::new(move || f().expr))))
}

/// Ties a recursive knot: `f` receives a reference to the parser it defines.
///
/// ```
/// use parsnip::chars::char;
/// use parsnip::{recursive, Parser};
///
/// // nested parentheses, counting the depth
/// let nested: Parser<char, usize> = recursive(|inner| {
///     inner.between(char('('), char(')')).map(|n| n + 1).option_or(0)
/// });
/// assert_eq!(nested.compile().unwrap().parse_str("((()))").into_result().unwrap(), 3);
/// ```
pub fn recursive<T: Token, A: Clone + 'static>(
    f: impl FnOnce(Parser<T, A>) -> Parser<T, A>,
) -> Parser<T, A> {
    let deferred = Deferred::new();
    let body = f(deferred.parser());
    deferred.define(body.clone());
    body
}

/// A forward reference to a parser that is defined later.
pub struct Deferred<T, A> {
    cell: LazyRef<T>,
    _marker: PhantomData<fn() -> A>,
}

impl<T: Token, A> Default for Deferred<T, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Token, A> Deferred<T, A> {
    /// An undefined reference.
    pub fn new() -> Self {
        Self {
            cell: LazyRef::new(LazyCell::undefined()),
            _marker: PhantomData,
        }
    }

    /// A parser that behaves like whatever this reference gets defined as.
    pub fn parser(&self) -> Parser<T, A> {
        node(Expr::Lazy(self.cell.clone()))
    }

    /// Defines the reference. Returns false if it was already defined.
    pub fn define(&self, p: Parser<T, A>) -> bool {
        self.cell.0.define(p.expr)
    }
}

impl<T: Token, A> Parser<T, A> {
    /// Wraps an untyped expression. The expression must produce an `A`.
    pub fn from_expr(expr: P<T>) -> Self {
        Self {
            expr,
            _marker: PhantomData,
        }
    }

    /// The untyped expression behind this parser.
    pub fn expr(&self) -> &P<T> {
        &self.expr
    }

    /// Runs `self`, then `next`, keeping the result of `next`.
    pub fn then<B>(self, next: Parser<T, B>) -> Parser<T, B> {
        node(Expr::Seq(SeqKind::Right, self.expr, next.expr))
    }

    /// Runs `self`, then `next`, keeping the result of `self`.
    pub fn skip<B>(self, next: Parser<T, B>) -> Parser<T, A> {
        node(Expr::Seq(SeqKind::Left, self.expr, next.expr))
    }

    /// Compiles with the default options.
    pub fn compile(&self) -> Result<Compiled<T, A>, CompileError> {
        self.compile_with(&CompileOptions::default())
    }

    /// Compiles with `options`.
    pub fn compile_with(&self, options: &CompileOptions) -> Result<Compiled<T, A>, CompileError> {
        parsnip_compiler::compile(&self.expr, options).map(Compiled::new)
    }
}

impl<T: Token, A: Clone + 'static> Parser<T, A> {
    /// Applies `f` to the result.
    pub fn map<B: 'static>(self, f: impl Fn(A) -> B + 'static) -> Parser<T, B> {
        node(Expr::Map(func1(f), self.expr))
    }

    /// Replaces the result by `b`.
    pub fn as_value<B: 'static>(self, b: B) -> Parser<T, B> {
        node(Expr::Map(Func1::constant(value(b)), self.expr))
    }

    /// Discards the result.
    pub fn void(self) -> Parser<T, ()> {
        self.as_value(())
    }

    /// Runs `self`, then `next`, and pairs their results.
    pub fn zip<B: Clone + 'static>(self, next: Parser<T, B>) -> Parser<T, (A, B)> {
        self.zip_with(next, |a, b| (a, b))
    }

    /// Runs `self`, then `next`, and combines their results with `f`.
    pub fn zip_with<B: Clone + 'static, C: 'static>(
        self,
        next: Parser<T, B>,
        f: impl Fn(A, B) -> C + 'static,
    ) -> Parser<T, C> {
        node(Expr::Seq(SeqKind::Both(func2(f)), self.expr, next.expr))
    }

    /// Tries `other` if `self` fails without consuming input.
    pub fn or(self, other: Parser<T, A>) -> Parser<T, A> {
        node(Expr::Alt(self.expr, other.expr))
    }

    /// Fails, without consuming more input, when the result does not satisfy `pred`.
    pub fn filter(self, pred: impl Fn(&A) -> bool + 'static) -> Parser<T, A> {
        self.map(move |a| if pred(&a) { Either::Right(a) } else { Either::Left(()) })
            .branch(empty::<T, ()>(), |(), ()| unreachable!("empty never succeeds"))
    }

    /// Zero or more repetitions.
    pub fn many(self) -> Parser<T, Vec<A>> {
        let items = Func1::new(|v| {
            value(
                take::<Vec<Value>>(v)
                    .into_iter()
                    .map(take::<A>)
                    .collect::<Vec<A>>(),
            )
        });
        node(Expr::Map(items, Rc::new(Expr::Many(self.expr))))
    }

    /// One or more repetitions.
    pub fn some(self) -> Parser<T, Vec<A>> {
        self.clone().zip_with(self.many(), prepend)
    }

    /// Zero or more repetitions, discarding the results.
    pub fn skip_many(self) -> Parser<T, ()> {
        node::<T, Vec<Value>>(Expr::Many(self.expr)).void()
    }

    /// The input consumed by `self`.
    pub fn chunk(self) -> Parser<T, T::Chunk> {
        node(Expr::Chunk(self.expr))
    }

    /// The input consumed by `self`, together with its result.
    pub fn with_chunk(self) -> Parser<T, (T::Chunk, A)> {
        node::<T, (T::Chunk, Value)>(Expr::MatchChunk(self.expr)).map(|(c, v)| (c, take::<A>(v)))
    }

    /// Runs `self` without consuming input.
    pub fn look_ahead(self) -> Parser<T, A> {
        node(Expr::LookAhead(self.expr))
    }

    /// Succeeds, without consuming input, only where `self` would fail.
    pub fn not_followed_by(self) -> Parser<T, ()> {
        node(Expr::NotFollowedBy(self.expr))
    }

    /// Rewinds the input when `self` fails, so an enclosing alternative can try
    /// something else.
    pub fn attempt(self) -> Parser<T, A> {
        node(Expr::Attempt(self.expr))
    }

    /// Reports `name` as expected when `self` fails without consuming input.
    pub fn label(self, name: impl Into<String>) -> Parser<T, A> {
        node(Expr::Label(Some(name.into()), self.expr))
    }

    /// Like [`label`](Self::label), but reports nothing as expected.
    pub fn hide(self) -> Parser<T, A> {
        node(Expr::Label(None, self.expr))
    }

    /// Turns a failure of `self` into a value. The input is rewound to where `self`
    /// started.
    pub fn catch(self) -> Parser<T, Result<A, ParseError<T>>> {
        node::<T, Result<Value, ParseError<T>>>(Expr::Catch(self.expr, CatchMode::Capture))
            .map(|r| r.map(take::<A>))
    }

    /// Produces `f(error)` when `self` fails.
    pub fn recover(self, f: impl Fn(ParseError<T>) -> A + 'static) -> Parser<T, A> {
        self.catch().map(move |r| r.unwrap_or_else(&f))
    }

    /// When `self` fails, runs `on_error` from where `self` started and combines its
    /// result with the error.
    pub fn handle<B: Clone + 'static>(
        self,
        on_error: Parser<T, B>,
        f: impl Fn(ParseError<T>, B) -> A + 'static,
    ) -> Parser<T, A> {
        self.catch()
            .map(|r| match r {
                Ok(a) => Either::Right(a),
                Err(e) => Either::Left(e),
            })
            .branch(on_error, f)
    }

    /// Rewrites any error that escapes `self`.
    pub fn region(self, f: impl Fn(ParseError<T>) -> ParseError<T> + 'static) -> Parser<T, A> {
        node(Expr::Catch(self.expr, CatchMode::Rewrite(ErrorMap::new(f))))
    }

    /// `Some` result of `self`, or `None` if it fails without consuming input.
    pub fn optional(self) -> Parser<T, Option<A>> {
        self.map(Some).or(pure(None))
    }

    /// The result of `self`, or `default` if it fails without consuming input.
    pub fn option_or(self, default: A) -> Parser<T, A> {
        self.or(pure(default))
    }

    /// `self` surrounded by `open` and `close`.
    pub fn between<O, C>(self, open: Parser<T, O>, close: Parser<T, C>) -> Parser<T, A> {
        open.then(self).skip(close)
    }

    /// Zero or more occurrences of `self`, separated by `sep`.
    pub fn sep_by<S>(self, sep: Parser<T, S>) -> Parser<T, Vec<A>> {
        self.sep_by1(sep).or(pure(Vec::new()))
    }

    /// One or more occurrences of `self`, separated by `sep`.
    pub fn sep_by1<S>(self, sep: Parser<T, S>) -> Parser<T, Vec<A>> {
        self.clone().zip_with(sep.then(self).many(), prepend)
    }
}

impl<T: Token, L: Clone + 'static, R: Clone + 'static> Parser<T, Either<L, R>> {
    /// Produces a `Right` as is. For a `Left`, runs `on_left` and combines both results.
    pub fn branch<B: Clone + 'static>(
        self,
        on_left: Parser<T, B>,
        f: impl Fn(L, B) -> R + 'static,
    ) -> Parser<T, R> {
        let untyped = func1(|e: Either<L, R>| e.map_left(value).map_right(value));
        let inspected = Rc::new(Expr::Map(untyped, self.expr));
        node(Expr::Branch(inspected, on_left.expr, func2(f)))
    }

    /// Produces a `Right` as is, and applies the function `f` produces to a `Left`.
    pub fn select(self, f: Parser<T, Rc<dyn Fn(L) -> R>>) -> Parser<T, R> {
        self.branch(f, |l, g| g(l))
    }
}
