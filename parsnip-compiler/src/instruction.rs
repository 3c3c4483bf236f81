//! The instruction set of the parsing machine.
//!
//! [`Instr`] is generic over its jump targets: code generation emits [`Label`]s and the
//! linker replaces them by absolute instruction indices.

use crate::error::{ExpectedSet, Failure};
use crate::expr::CatchMode;
use crate::token::Token;
use crate::value::{Func1, Func2, Pred, Value};
use itertools::Itertools;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

/// A symbolic jump target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Hands out fresh labels.
#[derive(Clone, Debug, Default)]
pub struct Labels {
    next: u32,
}

impl Labels {
    pub fn fresh(&mut self) -> Label {
        let l = Label(self.next);
        self.next += 1;
        l
    }
}

/// What a consuming instruction does with what it matched.
#[derive(Clone, Debug)]
pub enum Output {
    Discard,
    Keep,
    /// Pushes the matched value after applying the function.
    Map(Func1),
}

impl Output {
    pub fn then(&self, f: &Func1) -> Output {
        match self {
            Output::Discard => Output::Discard,
            Output::Keep => Output::Map(f.clone()),
            Output::Map(g) => Output::Map(g.then(f)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceMode {
    /// Pushes the consumed span.
    Chunk,
    /// Pops a value and pushes it paired with the consumed span.
    Pair,
}

#[derive(Clone, Debug)]
pub enum Instr<T, J> {
    // data stack
    Push(Value),
    Pop,
    Map(Func1),
    /// Pops `y`, then `x`, and pushes `f(x, y)`.
    Lift2(Func2),
    /// Pushes an empty list for a repetition to collect into.
    NewList,

    // primitives
    /// Consumes `token`.
    Single {
        token: T,
        expected: ExpectedSet<T>,
        out: Output,
    },
    /// Consumes one token that satisfies `pred`.
    Satisfy {
        pred: Pred<T>,
        expected: ExpectedSet<T>,
        out: Output,
    },
    /// Consumes `tokens`. On a mismatch the matching prefix stays consumed.
    Literal {
        tokens: Rc<[T]>,
        value: Value,
        expected: ExpectedSet<T>,
        out: Output,
    },
    /// Consumes tokens while the predicate holds.
    SatisfyMany {
        pred: Pred<T>,
        expected: ExpectedSet<T>,
        push: bool,
    },
    Eof {
        expected: ExpectedSet<T>,
    },
    Fail(Failure),
    /// Fails without an error message.
    Empty,
    /// Fails at the current token, expecting `expected`.
    Expect {
        expected: ExpectedSet<T>,
    },
    /// Records `expected` as a hint at the current offset.
    Hint {
        expected: ExpectedSet<T>,
    },

    // control
    Call(J),
    Return,
    Jump(J),
    /// Pops an `Either`, pushes its payload and jumps to `left` if it was a `Left`.
    Case {
        left: J,
    },
    /// Dispatches on the current token.
    Dispatch {
        table: Rc<HashMap<T, usize>>,
        targets: Vec<J>,
        /// Per target, what the alternatives before it expected.
        before: Vec<ExpectedSet<T>>,
        /// What all alternatives in the table expected.
        all: ExpectedSet<T>,
        /// Where tokens outside the table go; without one they fail.
        fallback: Option<J>,
    },

    // handlers: set up, and the success paths that remove them
    /// Installs a handler at `handler` and remembers the current offset.
    /// With `snapshot` the hints collected so far are set aside.
    Checkpoint {
        handler: J,
        snapshot: bool,
    },
    /// Removes the handler and jumps.
    Commit(J),
    /// Removes the handler and jumps, keeping the consumed input.
    Release(J),
    /// Removes the handler, rewinds and jumps.
    Restore(J),
    /// Removes the handler, rewinds and fails.
    NegFail,
    /// Removes the handler of a label and jumps to `end`.
    LabelOk {
        label: Option<String>,
        end: J,
    },
    /// Ends one iteration of a repetition.
    Loop {
        body: J,
        exit: J,
        push: bool,
    },

    // handler sites, reached on failure
    /// Continues if nothing was consumed, fails otherwise.
    Recover,
    /// Rewinds and keeps failing.
    Rewind,
    /// The body of a negative look-ahead failed: rewinds and succeeds.
    NegSucceed {
        push: bool,
    },
    /// Replaces what the error expected when the labelled parser consumed nothing.
    LabelErr {
        label: Option<String>,
    },
    /// Ends a repetition whose element failed without consuming input.
    ManyDone,
    CatchErr {
        mode: CatchMode<T>,
        push: bool,
    },

    // spans
    /// Remembers the current offset for the next `Slice`.
    Mark,
    Slice(SliceMode),
}

impl<T: Clone, J> Instr<T, J> {
    /// Every jump target of this instruction.
    pub fn targets(&self) -> Vec<&J> {
        match self {
            Instr::Call(j)
            | Instr::Jump(j)
            | Instr::Case { left: j }
            | Instr::Checkpoint { handler: j, .. }
            | Instr::Commit(j)
            | Instr::Release(j)
            | Instr::Restore(j)
            | Instr::LabelOk { end: j, .. } => vec![j],
            Instr::Loop { body, exit, .. } => vec![body, exit],
            Instr::Dispatch {
                targets, fallback, ..
            } => targets.iter().chain(fallback).collect(),
            _ => vec![],
        }
    }

    /// Maps every jump target.
    pub fn retarget<K, E>(&self, mut f: impl FnMut(&J) -> Result<K, E>) -> Result<Instr<T, K>, E> {
        Ok(match self {
            Instr::Call(j) => Instr::Call(f(j)?),
            Instr::Jump(j) => Instr::Jump(f(j)?),
            Instr::Case { left } => Instr::Case { left: f(left)? },
            Instr::Checkpoint { handler, snapshot } => Instr::Checkpoint {
                handler: f(handler)?,
                snapshot: *snapshot,
            },
            Instr::Commit(j) => Instr::Commit(f(j)?),
            Instr::Release(j) => Instr::Release(f(j)?),
            Instr::Restore(j) => Instr::Restore(f(j)?),
            Instr::LabelOk { label, end } => Instr::LabelOk {
                label: label.clone(),
                end: f(end)?,
            },
            Instr::Loop { body, exit, push } => Instr::Loop {
                body: f(body)?,
                exit: f(exit)?,
                push: *push,
            },
            Instr::Dispatch {
                table,
                targets,
                before,
                all,
                fallback,
            } => Instr::Dispatch {
                table: table.clone(),
                targets: targets.iter().map(&mut f).collect::<Result<_, _>>()?,
                before: before.clone(),
                all: all.clone(),
                fallback: fallback.as_ref().map(&mut f).transpose()?,
            },

            Instr::Push(v) => Instr::Push(v.clone()),
            Instr::Pop => Instr::Pop,
            Instr::Map(g) => Instr::Map(g.clone()),
            Instr::Lift2(g) => Instr::Lift2(g.clone()),
            Instr::NewList => Instr::NewList,
            Instr::Single {
                token,
                expected,
                out,
            } => Instr::Single {
                token: token.clone(),
                expected: expected.clone(),
                out: out.clone(),
            },
            Instr::Satisfy {
                pred,
                expected,
                out,
            } => Instr::Satisfy {
                pred: pred.clone(),
                expected: expected.clone(),
                out: out.clone(),
            },
            Instr::Literal {
                tokens,
                value,
                expected,
                out,
            } => Instr::Literal {
                tokens: tokens.clone(),
                value: value.clone(),
                expected: expected.clone(),
                out: out.clone(),
            },
            Instr::SatisfyMany {
                pred,
                expected,
                push,
            } => Instr::SatisfyMany {
                pred: pred.clone(),
                expected: expected.clone(),
                push: *push,
            },
            Instr::Eof { expected } => Instr::Eof {
                expected: expected.clone(),
            },
            Instr::Fail(e) => Instr::Fail(e.clone()),
            Instr::Empty => Instr::Empty,
            Instr::Expect { expected } => Instr::Expect {
                expected: expected.clone(),
            },
            Instr::Hint { expected } => Instr::Hint {
                expected: expected.clone(),
            },
            Instr::Return => Instr::Return,
            Instr::NegFail => Instr::NegFail,
            Instr::Recover => Instr::Recover,
            Instr::Rewind => Instr::Rewind,
            Instr::NegSucceed { push } => Instr::NegSucceed { push: *push },
            Instr::LabelErr { label } => Instr::LabelErr {
                label: label.clone(),
            },
            Instr::ManyDone => Instr::ManyDone,
            Instr::CatchErr { mode, push } => Instr::CatchErr {
                mode: mode.clone(),
                push: *push,
            },
            Instr::Mark => Instr::Mark,
            Instr::Slice(m) => Instr::Slice(*m),
        })
    }

    /// Whether execution never continues with the next instruction.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Instr::Jump(_)
                | Instr::Return
                | Instr::Commit(_)
                | Instr::Release(_)
                | Instr::Restore(_)
                | Instr::NegFail
                | Instr::LabelOk { .. }
                | Instr::Loop { .. }
                | Instr::Rewind
                | Instr::LabelErr { .. }
                | Instr::Fail(_)
                | Instr::Empty
                | Instr::Expect { .. }
                | Instr::Dispatch { .. }
        )
    }
}

/// One element of an instruction block during assembly.
#[derive(Clone, Debug)]
pub enum Asm<T> {
    /// Marks the position of a label.
    Mark(Label),
    Op(Instr<T, Label>),
}

fn output(out: &Output) -> &'static str {
    match out {
        Output::Discard => "",
        Output::Keep => " push",
        Output::Map(_) => " map",
    }
}

fn label(l: &Option<String>) -> &str {
    l.as_deref().unwrap_or("<hidden>")
}

impl<T: Token, J: Display> Display for Instr<T, J> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Instr::Push(_) => write!(f, "push"),
            Instr::Pop => write!(f, "pop"),
            Instr::Map(_) => write!(f, "map"),
            Instr::Lift2(_) => write!(f, "lift2"),
            Instr::NewList => write!(f, "new_list"),
            Instr::Single { token, out, .. } => {
                write!(f, "single {}{}", T::describe(std::slice::from_ref(token)), output(out))
            }
            Instr::Satisfy { expected, out, .. } => write!(f, "satisfy [{expected}]{}", output(out)),
            Instr::Literal { tokens, out, .. } => {
                write!(f, "literal {}{}", T::describe(tokens), output(out))
            }
            Instr::SatisfyMany { expected, push, .. } => {
                write!(f, "satisfy_many [{expected}]{}", if *push { " push" } else { "" })
            }
            Instr::Eof { .. } => write!(f, "eof"),
            Instr::Fail(e) => write!(f, "fail {e:?}"),
            Instr::Empty => write!(f, "empty"),
            Instr::Expect { expected } => write!(f, "expect [{expected}]"),
            Instr::Hint { expected } => write!(f, "hint [{expected}]"),
            Instr::Call(j) => write!(f, "call {j}"),
            Instr::Return => write!(f, "return"),
            Instr::Jump(j) => write!(f, "jump {j}"),
            Instr::Case { left } => write!(f, "case left={left}"),
            Instr::Dispatch {
                table,
                targets,
                fallback,
                ..
            } => {
                let entries = table
                    .iter()
                    .map(|(t, &i)| (T::describe(std::slice::from_ref(t)), i))
                    .sorted()
                    .map(|(t, i)| format!("{t}->{}", targets[i]))
                    .join(", ");
                write!(f, "dispatch {{{entries}}}")?;
                if let Some(fb) = fallback {
                    write!(f, " else {fb}")?;
                }
                Ok(())
            }
            Instr::Checkpoint { handler, snapshot } => {
                write!(f, "checkpoint {handler}{}", if *snapshot { " snapshot" } else { "" })
            }
            Instr::Commit(j) => write!(f, "commit {j}"),
            Instr::Release(j) => write!(f, "release {j}"),
            Instr::Restore(j) => write!(f, "restore {j}"),
            Instr::NegFail => write!(f, "neg_fail"),
            Instr::LabelOk { label: l, end } => write!(f, "label_ok {} {end}", label(l)),
            Instr::Loop { body, exit, push } => {
                write!(f, "loop {body} {exit}{}", if *push { " push" } else { "" })
            }
            Instr::Recover => write!(f, "recover"),
            Instr::Rewind => write!(f, "rewind"),
            Instr::NegSucceed { push } => {
                write!(f, "neg_succeed{}", if *push { " push" } else { "" })
            }
            Instr::LabelErr { label: l } => write!(f, "label_err {}", label(l)),
            Instr::ManyDone => write!(f, "many_done"),
            Instr::CatchErr { mode, push } => {
                let mode = match mode {
                    CatchMode::Capture => "capture",
                    CatchMode::Rewrite(_) => "rewrite",
                };
                write!(f, "catch_err {mode}{}", if *push { " push" } else { "" })
            }
            Instr::Mark => write!(f, "mark"),
            Instr::Slice(SliceMode::Chunk) => write!(f, "slice"),
            Instr::Slice(SliceMode::Pair) => write!(f, "slice pair"),
        }
    }
}
