//! The backtracking stack machine that runs a linked [`Program`].
//!
//! Failure is handled by unwinding to the innermost handler, which restores the data
//! and return stacks to the depths it recorded and continues at its handler site. The
//! handler site decides whether the failure is recovered or keeps propagating.
//!
//! A machine that runs out of input while more may arrive suspends: it saves the
//! program counter of the instruction that needed input on the return stack and stops.
//! Feeding it more input re-runs exactly that instruction.

use parsnip_compiler::instruction::{Instr, Output, SliceMode};
use parsnip_compiler::{
    take, unit, value, Branch, CatchMode, Either, ErrorItem, ExpectedSet, ParseError, Program,
    Token, Value,
};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Status {
    Ok,
    Suspended,
    Err,
}

/// Where to continue after a failure, and the stack depths to restore.
#[derive(Clone, Copy, Debug)]
struct Handler {
    pc: usize,
    data: usize,
    calls: usize,
    checks: usize,
}

#[derive(Clone, Debug)]
struct Check<T> {
    offset: usize,
    /// Hints set aside by a snapshotting checkpoint.
    saved: Option<Option<ParseError<T>>>,
}

/// The result of a finished run, with the unconsumed input.
pub(crate) enum Finished<T> {
    Done(Value, Vec<T>),
    Failure(ParseError<T>, Vec<T>),
}

pub(crate) struct Machine<T: Token> {
    program: Program<T>,
    input: Vec<T>,
    /// Whether more input may still arrive.
    more: bool,
    offset: usize,
    pc: usize,
    status: Status,

    data: Vec<Value>,
    calls: Vec<usize>,
    handlers: Vec<Handler>,
    checks: Vec<Check<T>>,

    error: Option<ParseError<T>>,
    hints: Option<ParseError<T>>,
    /// Partial lists of fused repetitions that suspended, by program counter.
    scratch: HashMap<usize, Vec<Value>>,
}

impl<T: Token> Machine<T> {
    pub fn new(program: Program<T>, input: Vec<T>, more: bool) -> Self {
        Self {
            program,
            input,
            more,
            offset: 0,
            pc: 0,
            status: Status::Ok,
            data: Vec::new(),
            calls: Vec::new(),
            handlers: Vec::new(),
            checks: Vec::new(),
            error: None,
            hints: None,
            scratch: HashMap::new(),
        }
    }

    /// Whether input may still be fed.
    pub fn expects_more(&self) -> bool {
        self.more
    }

    /// Appends a chunk of input, or with `None` declares that no more will come.
    /// A suspended machine becomes runnable again.
    pub fn feed(&mut self, chunk: Option<&[T]>) {
        match chunk {
            Some(chunk) => self.input.extend_from_slice(chunk),
            None => self.more = false,
        }
        if self.status == Status::Suspended {
            if let Some(pc) = self.calls.pop() {
                self.pc = pc;
            }
            self.status = Status::Ok;
            log::debug!(
                "resuming at {} with {} tokens buffered",
                self.pc,
                self.input.len() - self.offset
            );
        }
    }

    /// Runs until the program ends, fails or suspends.
    pub fn run(&mut self) -> Status {
        let program = self.program.clone();
        let code = program.instructions();
        while self.status == Status::Ok && self.pc < code.len() {
            let instr = &code[self.pc];
            log::trace!("{:4}: {instr} @ {}", self.pc, self.offset);
            self.step(instr, code.len());
        }
        self.status
    }

    /// The outcome of a machine that is no longer running or suspended.
    pub fn finish(mut self) -> Finished<T> {
        let offset = self.offset.min(self.input.len());
        let rest = self.input.split_off(offset);
        match self.status {
            Status::Err => {
                let error = ParseError::merge_opt(self.hints, self.error)
                    .unwrap_or_else(|| empty_error(offset));
                Finished::Failure(error, rest)
            }
            _ => Finished::Done(self.data.pop().unwrap_or_else(unit), rest),
        }
    }

    fn step(&mut self, instr: &Instr<T, usize>, len: usize) {
        match instr {
            Instr::Push(v) => {
                self.data.push(v.clone());
                self.pc += 1;
            }
            Instr::Pop => {
                self.pop();
                self.pc += 1;
            }
            Instr::Map(f) => {
                let x = self.pop();
                self.data.push(f.call(x));
                self.pc += 1;
            }
            Instr::Lift2(f) => {
                let y = self.pop();
                let x = self.pop();
                self.data.push(f.call(x, y));
                self.pc += 1;
            }
            Instr::NewList => {
                self.data.push(value(Vec::<Value>::new()));
                self.pc += 1;
            }

            Instr::Single {
                token,
                expected,
                out,
            } => self.one(expected, out, |t| t == token),
            Instr::Satisfy {
                pred,
                expected,
                out,
            } => self.one(expected, out, |t| pred.test(t)),
            Instr::Literal {
                tokens,
                value: v,
                expected,
                out,
            } => self.literal(tokens, v, expected, out),
            Instr::SatisfyMany {
                pred,
                expected,
                push,
            } => {
                let mut items = self.scratch.remove(&self.pc).unwrap_or_default();
                loop {
                    match self.input.get(self.offset) {
                        Some(t) if pred.test(t) => {
                            if *push {
                                items.push(value(t.clone()));
                            }
                            self.offset += 1;
                        }
                        None if self.more => {
                            self.scratch.insert(self.pc, items);
                            self.suspend();
                            return;
                        }
                        _ => {
                            let hint = self.trivial(self.here(), expected.clone());
                            self.hint(hint);
                            break;
                        }
                    }
                }
                if *push {
                    self.data.push(value(items));
                }
                self.pc += 1;
            }
            Instr::Eof { expected } => match self.input.get(self.offset) {
                Some(_) => self.fail(self.trivial(self.here(), expected.clone())),
                None if self.more => self.suspend(),
                None => self.pc += 1,
            },
            Instr::Fail(f) => self.fail(f.at(self.offset)),
            Instr::Empty => self.fail(empty_error(self.offset)),
            Instr::Expect { expected } => {
                if self.needs_input() {
                    self.suspend();
                } else {
                    self.fail(self.trivial(self.here(), expected.clone()));
                }
            }
            Instr::Hint { expected } => {
                self.hint(ParseError::Trivial {
                    offset: self.offset,
                    unexpected: None,
                    expected: expected.clone(),
                });
                self.pc += 1;
            }

            Instr::Call(target) => {
                self.calls.push(self.pc + 1);
                self.pc = *target;
            }
            Instr::Return => self.pc = self.calls.pop().unwrap_or(len),
            Instr::Jump(target) => self.pc = *target,
            Instr::Case { left } => {
                let x = self.pop();
                match x.downcast::<Branch>() {
                    Ok(b) => match Rc::try_unwrap(b).unwrap_or_else(|b| (*b).clone()) {
                        Either::Left(l) => {
                            self.data.push(l);
                            self.pc = *left;
                        }
                        Either::Right(r) => {
                            self.data.push(r);
                            self.pc += 1;
                        }
                    },
                    Err(_) => panic!(
                        "branch at instruction {} expected an `Either` value; \
                         the expression was built with mismatched types",
                        self.pc
                    ),
                }
            }
            Instr::Dispatch {
                table,
                targets,
                before,
                all,
                fallback,
            } => {
                if self.needs_input() {
                    self.suspend();
                    return;
                }
                let found = self.input.get(self.offset).and_then(|t| table.get(t));
                match (found, fallback) {
                    (Some(&k), _) => {
                        if !before[k].is_empty() {
                            let hint = self.trivial(self.here(), before[k].clone());
                            self.hint(hint);
                        }
                        self.pc = targets[k];
                    }
                    (None, Some(f)) => {
                        let hint = self.trivial(self.here(), all.clone());
                        self.hint(hint);
                        self.pc = *f;
                    }
                    (None, None) => self.fail(self.trivial(self.here(), all.clone())),
                }
            }

            Instr::Checkpoint { handler, snapshot } => {
                let saved = snapshot.then(|| self.hints.take());
                self.checks.push(Check {
                    offset: self.offset,
                    saved,
                });
                self.handlers.push(Handler {
                    pc: *handler,
                    data: self.data.len(),
                    calls: self.calls.len(),
                    checks: self.checks.len(),
                });
                self.pc += 1;
            }
            Instr::Commit(target) | Instr::Release(target) => {
                self.handlers.pop();
                let check = self.pop_check();
                self.reinstate(check.saved);
                self.pc = *target;
            }
            Instr::Restore(target) => {
                self.handlers.pop();
                let check = self.pop_check();
                self.offset = check.offset;
                self.reinstate(check.saved);
                self.pc = *target;
            }
            Instr::NegFail => {
                let start = self.peek_check().offset;
                if self.offset == start && self.needs_input() {
                    self.suspend();
                    return;
                }
                self.handlers.pop();
                let check = self.pop_check();
                if let Some(saved) = check.saved {
                    self.hints = saved;
                }
                let unexpected = if self.offset > start {
                    ErrorItem::Tokens(self.input[start..self.offset].to_vec())
                } else {
                    self.here()
                };
                self.offset = start;
                self.fail(ParseError::Trivial {
                    offset: start,
                    unexpected: Some(unexpected),
                    expected: ExpectedSet::empty(),
                });
            }
            Instr::LabelOk { label, end } => {
                self.handlers.pop();
                let check = self.pop_check();
                let saved = check.saved.flatten();
                let inside = self.hints.take();
                let inside = if self.offset == check.offset {
                    let later = inside.filter(|h| h.offset() > check.offset);
                    let own = label.as_ref().map(|l| ParseError::Trivial {
                        offset: check.offset,
                        unexpected: None,
                        expected: ExpectedSet::label(l.clone()),
                    });
                    ParseError::merge_opt(later, own)
                } else if label.is_none() {
                    None
                } else {
                    inside
                };
                self.hints = ParseError::merge_opt(saved, inside);
                self.pc = *end;
            }
            Instr::Loop { body, exit, push } => {
                if *push {
                    let x = self.pop();
                    let list = self.pop();
                    self.data.push(append(list, x));
                }
                let progressed = self.peek_check().offset != self.offset;
                if progressed {
                    let offset = self.offset;
                    if let Some(check) = self.checks.last_mut() {
                        check.offset = offset;
                    }
                    self.pc = *body;
                } else {
                    self.handlers.pop();
                    let check = self.pop_check();
                    self.reinstate(check.saved);
                    self.pc = *exit;
                }
            }

            Instr::Recover | Instr::ManyDone => {
                let check = self.pop_check();
                self.reinstate(check.saved);
                if self.offset == check.offset {
                    let e = self.take_error();
                    self.hint(e);
                    self.pc += 1;
                } else {
                    self.unwind();
                }
            }
            Instr::Rewind => {
                let check = self.pop_check();
                self.offset = check.offset;
                self.reinstate(check.saved);
                self.unwind();
            }
            Instr::NegSucceed { push } => {
                let check = self.pop_check();
                self.offset = check.offset;
                if let Some(saved) = check.saved {
                    self.hints = saved;
                }
                self.error = None;
                if *push {
                    self.data.push(unit());
                }
                self.pc += 1;
            }
            Instr::LabelErr { label } => {
                let check = self.pop_check();
                let saved = check.saved.flatten();
                let mut e = self.take_error();
                let mut inside = self.hints.take();
                if e.offset() == check.offset {
                    let expected = match label {
                        Some(l) => ExpectedSet::label(l.clone()),
                        None => ExpectedSet::empty(),
                    };
                    e = e.with_expected(expected);
                    inside = inside.filter(|h| h.offset() != check.offset);
                }
                self.hints = ParseError::merge_opt(saved, inside);
                self.error = Some(e);
                self.unwind();
            }
            Instr::CatchErr { mode, push } => {
                let check = self.pop_check();
                match mode {
                    CatchMode::Capture => {
                        if let Some(saved) = check.saved {
                            self.hints = saved;
                        }
                        self.offset = check.offset;
                        let e = self.take_error();
                        if *push {
                            self.data.push(value(Err::<Value, ParseError<T>>(e)));
                        }
                        self.pc += 1;
                    }
                    CatchMode::Rewrite(f) => {
                        let e = f.apply(self.take_error());
                        let hints = ParseError::merge_opt(check.saved.flatten(), self.hints.take());
                        self.hints = hints.filter(|h| h.offset() > e.offset());
                        self.error = Some(e);
                        self.unwind();
                    }
                }
            }

            Instr::Mark => {
                self.checks.push(Check {
                    offset: self.offset,
                    saved: None,
                });
                self.pc += 1;
            }
            Instr::Slice(mode) => {
                let start = self.pop_check().offset;
                let chunk = T::chunk(&self.input[start..self.offset]);
                match mode {
                    SliceMode::Chunk => self.data.push(value(chunk)),
                    SliceMode::Pair => {
                        let v = self.pop();
                        self.data.push(value((chunk, v)));
                    }
                }
                self.pc += 1;
            }
        }
    }

    /// Consumes one token accepted by `accept`.
    fn one(&mut self, expected: &ExpectedSet<T>, out: &Output, accept: impl Fn(&T) -> bool) {
        match self.input.get(self.offset) {
            Some(t) if accept(t) => {
                let t = t.clone();
                self.offset += 1;
                self.emit(out, || value(t));
                self.pc += 1;
            }
            None if self.more => self.suspend(),
            _ => self.fail(self.trivial(self.here(), expected.clone())),
        }
    }

    /// Consumes `tokens` in full. On a mismatch the matching prefix stays consumed and
    /// the error points at the first token that differs.
    fn literal(&mut self, tokens: &[T], v: &Value, expected: &ExpectedSet<T>, out: &Output) {
        let rest = &self.input[self.offset.min(self.input.len())..];
        let k = tokens.iter().zip(rest).take_while(|(a, b)| a == b).count();
        if k == tokens.len() {
            self.offset += k;
            self.emit(out, || v.clone());
            self.pc += 1;
        } else if k == rest.len() && self.more {
            self.suspend();
        } else {
            self.offset += k;
            self.fail(self.trivial(self.here(), expected.clone()));
        }
    }

    fn emit(&mut self, out: &Output, v: impl FnOnce() -> Value) {
        match out {
            Output::Discard => {}
            Output::Keep => self.data.push(v()),
            Output::Map(f) => self.data.push(f.call(v())),
        }
    }

    /// What sits at the cursor, for error reporting.
    fn here(&self) -> ErrorItem<T> {
        match self.input.get(self.offset) {
            Some(t) => ErrorItem::Tokens(vec![t.clone()]),
            None => ErrorItem::EndOfInput,
        }
    }

    fn trivial(&self, unexpected: ErrorItem<T>, expected: ExpectedSet<T>) -> ParseError<T> {
        ParseError::Trivial {
            offset: self.offset,
            unexpected: Some(unexpected),
            expected,
        }
    }

    fn needs_input(&self) -> bool {
        self.more && self.offset >= self.input.len()
    }

    fn suspend(&mut self) {
        log::debug!("suspending at {}, offset {}", self.pc, self.offset);
        self.calls.push(self.pc);
        self.pc = self.program.len();
        self.status = Status::Suspended;
    }

    fn fail(&mut self, e: ParseError<T>) {
        self.error = Some(e);
        self.unwind();
    }

    /// Transfers control to the innermost handler, or stops the machine.
    fn unwind(&mut self) {
        match self.handlers.pop() {
            Some(h) => {
                self.data.truncate(h.data);
                self.calls.truncate(h.calls);
                self.checks.truncate(h.checks);
                self.pc = h.pc;
            }
            None => self.status = Status::Err,
        }
    }

    fn hint(&mut self, e: ParseError<T>) {
        self.hints = ParseError::merge_opt(self.hints.take(), Some(e));
    }

    /// Merges hints set aside by a snapshot back in.
    fn reinstate(&mut self, saved: Option<Option<ParseError<T>>>) {
        if let Some(saved) = saved {
            self.hints = ParseError::merge_opt(saved, self.hints.take());
        }
    }

    fn take_error(&mut self) -> ParseError<T> {
        self.error
            .take()
            .unwrap_or_else(|| empty_error(self.offset))
    }

    fn pop(&mut self) -> Value {
        match self.data.pop() {
            Some(v) => v,
            None => panic!("data stack underflow at instruction {}", self.pc),
        }
    }

    fn peek_check(&self) -> &Check<T> {
        match self.checks.last() {
            Some(c) => c,
            None => panic!("no input check at instruction {}", self.pc),
        }
    }

    fn pop_check(&mut self) -> Check<T> {
        match self.checks.pop() {
            Some(c) => c,
            None => panic!("no input check at instruction {}", self.pc),
        }
    }
}

fn empty_error<T: Token>(offset: usize) -> ParseError<T> {
    ParseError::Trivial {
        offset,
        unexpected: None,
        expected: ExpectedSet::empty(),
    }
}

/// Appends `x` to a list value, in place when the list is not shared.
fn append(mut list: Value, x: Value) -> Value {
    if let Some(items) = Rc::get_mut(&mut list).and_then(|l| l.downcast_mut::<Vec<Value>>()) {
        items.push(x);
        return list;
    }
    let mut items: Vec<Value> = take(list);
    items.push(x);
    value(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsnip_compiler::expr::{Expr, SeqKind, P};
    use parsnip_compiler::{compile, CompileOptions, Constant};

    fn single(c: char) -> P<char> {
        Rc::new(Expr::Single(c, ExpectedSet::single(ErrorItem::Tokens(vec![c]))))
    }

    fn run(p: &P<char>, input: &str) -> Finished<char> {
        let program = compile(p, &CompileOptions::default()).unwrap();
        let mut m = Machine::new(program, input.chars().collect(), false);
        m.run();
        m.finish()
    }

    #[test]
    fn sequences_leave_one_value() {
        let p = Rc::new(Expr::Seq(SeqKind::Left, single('a'), single('b')));
        let Finished::Done(v, rest) = run(&p, "abc") else {
            panic!("expected success");
        };
        assert_eq!(take::<char>(v), 'a');
        assert_eq!(rest, vec!['c']);
    }

    #[test]
    fn failures_report_the_offending_token() {
        let p = Rc::new(Expr::Seq(SeqKind::Right, single('a'), single('b')));
        let Finished::Failure(e, rest) = run(&p, "ax") else {
            panic!("expected failure");
        };
        assert_eq!(e.offset(), 1);
        assert_eq!(e.unexpected(), Some(&ErrorItem::Tokens(vec!['x'])));
        assert_eq!(rest, vec!['x']);
    }

    #[test]
    fn repetition_collects_values() {
        let p = Rc::new(Expr::Many(Rc::new(Expr::Alt(single('a'), single('b')))));
        let Finished::Done(v, rest) = run(&p, "abba!") else {
            panic!("expected success");
        };
        let items: Vec<char> = take::<Vec<Value>>(v).into_iter().map(take::<char>).collect();
        assert_eq!(items, vec!['a', 'b', 'b', 'a']);
        assert_eq!(rest, vec!['!']);
    }

    #[test]
    fn suspended_machines_rerun_the_waiting_instruction() {
        let p = Rc::new(Expr::Literal(
            "null".chars().collect::<Vec<_>>().into(),
            Constant::unit(),
            ExpectedSet::empty(),
        ));
        let program = compile(&p, &CompileOptions::default()).unwrap();
        let mut m = Machine::new(program, vec!['n', 'u'], true);
        assert_eq!(m.run(), Status::Suspended);
        m.feed(Some(&['l', 'l']));
        assert_eq!(m.run(), Status::Ok);
        assert!(matches!(m.finish(), Finished::Done(_, rest) if rest.is_empty()));
    }
}
