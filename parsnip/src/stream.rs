//! Parsing input that arrives in chunks.
//!
//! A streaming parse suspends whenever it needs a token that has not arrived yet. It
//! reports [`Streaming::Complete`] only once the end of the stream was signalled, so
//! the result and the remaining input are the same as when parsing the concatenation
//! of all chunks at once.

use crate::machine::{Machine, Status};
use crate::outcome::Outcome;
use parsnip_compiler::Token;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

/// The state of a streaming parse.
pub enum Streaming<T: Token, A> {
    /// The stream has ended and the parse is over.
    Complete(Outcome<T, A>),
    /// The parse needs more input, or a signal that there is none.
    Partial(Suspended<T, A>),
}

impl<T: Token, A: Debug> Debug for Streaming<T, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Streaming::Complete(o) => f.debug_tuple("Complete").field(o).finish(),
            Streaming::Partial(_) => write!(f, "Partial(..)"),
        }
    }
}

/// A parse waiting for input.
pub struct Suspended<T: Token, A> {
    machine: Machine<T>,
    _marker: PhantomData<fn() -> A>,
}

impl<T: Token, A: Clone + 'static> Suspended<T, A> {
    /// Continues with the next chunk, or with `None` to signal the end of the stream.
    pub fn resume(mut self, chunk: Option<&[T]>) -> Streaming<T, A> {
        self.machine.feed(chunk);
        drive(self.machine)
    }

    /// Feeds every chunk in turn and then ends the stream.
    pub fn finish<'a>(self, chunks: impl IntoIterator<Item = &'a [T]>) -> Outcome<T, A> {
        let mut state = Streaming::Partial(self);
        for chunk in chunks {
            state = match state {
                Streaming::Partial(s) => s.resume(Some(chunk)),
                complete => return complete.into_outcome_or_end(),
            };
        }
        state.into_outcome_or_end()
    }
}

impl<T: Token, A: Clone + 'static> Streaming<T, A> {
    /// Whether the parse is over.
    pub fn is_complete(&self) -> bool {
        matches!(self, Streaming::Complete(_))
    }

    /// The outcome, ending the stream first if the parse is still waiting.
    pub fn into_outcome_or_end(self) -> Outcome<T, A> {
        let mut state = self;
        loop {
            match state {
                Streaming::Complete(o) => return o,
                Streaming::Partial(s) => state = s.resume(None),
            }
        }
    }
}

/// Runs the machine as far as the buffered input allows.
pub(crate) fn drive<T: Token, A: Clone + 'static>(mut machine: Machine<T>) -> Streaming<T, A> {
    let status = machine.run();
    if status == Status::Suspended || machine.expects_more() {
        Streaming::Partial(Suspended {
            machine,
            _marker: PhantomData,
        })
    } else {
        Streaming::Complete(Outcome::from_finished(machine.finish()))
    }
}
