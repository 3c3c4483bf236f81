use crate::machine::{Finished, Machine};
use crate::stream::{drive, Streaming};
use parsnip_compiler::{take, ParseError, Program, Token};
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

/// A compiled parser, ready to run on any number of inputs.
pub struct Compiled<T, A> {
    program: Program<T>,
    _marker: PhantomData<fn() -> A>,
}

impl<T, A> Clone for Compiled<T, A> {
    fn clone(&self) -> Self {
        Self {
            program: self.program.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Token, A> Debug for Compiled<T, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Compiled({} instructions)", self.program.len())
    }
}

/// The result of a complete parse, with the input that was not consumed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T, A> {
    /// The parser succeeded.
    Done {
        /// What the parser produced.
        value: A,
        /// The input after the last consumed token.
        rest: Vec<T>,
    },
    /// The parser failed.
    Failure {
        /// The error, merged from every alternative that was tried.
        error: ParseError<T>,
        /// The input that was not consumed when the parse failed.
        rest: Vec<T>,
    },
}

impl<T, A> Outcome<T, A> {
    /// Whether the parse succeeded.
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done { .. })
    }

    /// The input that was not consumed.
    pub fn rest(&self) -> &[T] {
        match self {
            Outcome::Done { rest, .. } | Outcome::Failure { rest, .. } => rest,
        }
    }

    /// Drops the remaining input.
    pub fn into_result(self) -> Result<A, ParseError<T>> {
        match self {
            Outcome::Done { value, .. } => Ok(value),
            Outcome::Failure { error, .. } => Err(error),
        }
    }
}

impl<T: Token, A: Clone + 'static> Outcome<T, A> {
    pub(crate) fn from_finished(finished: Finished<T>) -> Self {
        match finished {
            Finished::Done(v, rest) => Outcome::Done {
                value: take::<A>(v),
                rest,
            },
            Finished::Failure(error, rest) => Outcome::Failure { error, rest },
        }
    }
}

impl<T: Token, A> Compiled<T, A> {
    pub(crate) fn new(program: Program<T>) -> Self {
        Self {
            program,
            _marker: PhantomData,
        }
    }

    /// The linked program, for inspection.
    pub fn program(&self) -> &Program<T> {
        &self.program
    }
}

impl<T: Token, A: Clone + 'static> Compiled<T, A> {
    /// Parses a complete input.
    pub fn parse(&self, input: &[T]) -> Outcome<T, A> {
        let mut machine = Machine::new(self.program.clone(), input.to_vec(), false);
        machine.run();
        Outcome::from_finished(machine.finish())
    }

    /// Starts a parse that receives its input in chunks. See [`Streaming`].
    pub fn parse_streaming(&self, chunk: &[T]) -> Streaming<T, A> {
        drive(Machine::new(self.program.clone(), chunk.to_vec(), true))
    }
}
