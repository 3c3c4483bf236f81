//! Code generation from a bound, optimized expression to labelled instruction blocks.
//!
//! Generation runs on an explicit task stack: each expression node expands into the
//! instructions around it and tasks for its children. Every child is generated either
//! to produce its value or in discard mode, where it only matches and leaves nothing on
//! the data stack.

use crate::binding::{Bound, Subroutine};
use crate::config::CompileOptions;
use crate::error::{ErrorItem, ExpectedSet, ParseError};
use crate::expr::{CatchMode, Expr, SeqKind, P};
use crate::instruction::{Asm, Instr, Label, Labels, Output, SliceMode};
use crate::leading::{lead, Lead};
use crate::token::Token;
use crate::value::{unit, value, Func1, Pred, Value};
use crate::CompileError;
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

/// A subroutine's code, entered at `entry`.
#[derive(Clone, Debug)]
pub struct Block<T> {
    pub entry: Label,
    pub code: Vec<Asm<T>>,
    pub recursive: bool,
}

/// The output of code generation, before linking.
#[derive(Clone, Debug)]
pub struct Assembly<T> {
    pub main: Vec<Asm<T>>,
    pub subroutines: BTreeMap<u32, Block<T>>,
    pub labels: Labels,
}

impl<T> Assembly<T> {
    /// The number of instructions, not counting label marks.
    pub fn size(&self) -> usize {
        let count = |code: &[Asm<T>]| code.iter().filter(|a| matches!(a, Asm::Op(_))).count();
        count(&self.main) + self.subroutines.values().map(|b| count(&b.code)).sum::<usize>()
    }
}

enum Task<T> {
    Gen(P<T>, bool),
    Emit(Asm<T>),
}

fn op<T>(i: Instr<T, Label>) -> Task<T> {
    Task::Emit(Asm::Op(i))
}

fn mark<T>(l: Label) -> Task<T> {
    Task::Emit(Asm::Mark(l))
}

fn gen<T>(p: &P<T>, discard: bool) -> Task<T> {
    Task::Gen(p.clone(), discard)
}

fn out(discard: bool) -> Output {
    if discard {
        Output::Discard
    } else {
        Output::Keep
    }
}

struct Generator<'a, T> {
    options: &'a CompileOptions,
    subroutines: &'a BTreeMap<u32, Subroutine<T>>,
    entries: HashMap<u32, Label>,
    labels: Labels,
    tables: usize,
}

impl<'a, T: Token> Generator<'a, T> {
    fn block(&mut self, root: &P<T>) -> Result<Vec<Asm<T>>, CompileError> {
        let mut code = Vec::new();
        let mut tasks = vec![gen(root, false)];
        while let Some(task) = tasks.pop() {
            match task {
                Task::Emit(a) => code.push(a),
                Task::Gen(p, discard) => {
                    let expansion = self.expand(&p, discard)?;
                    tasks.extend(expansion.into_iter().rev());
                }
            }
        }
        Ok(code)
    }

    fn expand(&mut self, p: &P<T>, d: bool) -> Result<Vec<Task<T>>, CompileError> {
        Ok(match p.as_ref() {
            Expr::Pure(_) if d => vec![],
            Expr::Pure(c) => vec![op(Instr::Push(c.get()))],
            Expr::Fail(f) => vec![op(Instr::Fail(f.clone()))],
            Expr::Empty => vec![op(Instr::Empty)],
            Expr::Satisfy(pred, expected) => vec![op(Instr::Satisfy {
                pred: pred.clone(),
                expected: expected.clone(),
                out: out(d),
            })],
            Expr::Single(token, expected) => vec![op(Instr::Single {
                token: token.clone(),
                expected: expected.clone(),
                out: out(d),
            })],
            Expr::Literal(tokens, c, expected) => vec![op(Instr::Literal {
                tokens: tokens.clone(),
                value: c.get(),
                expected: expected.clone(),
                out: out(d),
            })],
            Expr::Eof => {
                let mut res = vec![op(Instr::Eof {
                    expected: ExpectedSet::single(ErrorItem::EndOfInput),
                })];
                if !d {
                    res.push(op(Instr::Push(unit())));
                }
                res
            }

            Expr::Map(_, q) if d => vec![gen(q, true)],
            Expr::Map(f, q) => vec![gen(q, false), op(Instr::Map(f.clone()))],
            Expr::Seq(SeqKind::Both(_), a, b) if d => vec![gen(a, true), gen(b, true)],
            Expr::Seq(SeqKind::Both(f), a, b) => {
                vec![gen(a, false), gen(b, false), op(Instr::Lift2(f.clone()))]
            }
            Expr::Seq(SeqKind::Left, a, b) => vec![gen(a, d), gen(b, true)],
            Expr::Seq(SeqKind::Right, a, b) => vec![gen(a, true), gen(b, d)],
            Expr::Alt(a, b) => self.alternation(alternatives(a, b), d),
            Expr::Branch(q, r, f) => {
                let (left, end) = (self.labels.fresh(), self.labels.fresh());
                let mut res = vec![
                    gen(q, false),
                    op(Instr::Case { left }),
                    op(Instr::Jump(end)),
                    mark(left),
                    gen(r, false),
                    op(Instr::Lift2(f.clone())),
                    mark(end),
                ];
                if d {
                    res.push(op(Instr::Pop));
                }
                res
            }

            Expr::LookAhead(q) => {
                let (handler, end) = (self.labels.fresh(), self.labels.fresh());
                vec![
                    op(Instr::Checkpoint {
                        handler,
                        snapshot: false,
                    }),
                    gen(q, d),
                    op(Instr::Restore(end)),
                    mark(handler),
                    op(Instr::Rewind),
                    mark(end),
                ]
            }
            Expr::NotFollowedBy(q) => {
                let handler = self.labels.fresh();
                vec![
                    op(Instr::Checkpoint {
                        handler,
                        snapshot: true,
                    }),
                    gen(q, true),
                    op(Instr::NegFail),
                    mark(handler),
                    op(Instr::NegSucceed { push: !d }),
                ]
            }
            Expr::Attempt(q) => {
                let (handler, end) = (self.labels.fresh(), self.labels.fresh());
                vec![
                    op(Instr::Checkpoint {
                        handler,
                        snapshot: false,
                    }),
                    gen(q, d),
                    op(Instr::Release(end)),
                    mark(handler),
                    op(Instr::Rewind),
                    mark(end),
                ]
            }
            Expr::Many(q) => self.many(q, d),
            Expr::Chunk(q) if d => vec![gen(q, true)],
            Expr::Chunk(q) => vec![
                op(Instr::Mark),
                gen(q, true),
                op(Instr::Slice(SliceMode::Chunk)),
            ],
            Expr::MatchChunk(q) if d => vec![gen(q, true)],
            Expr::MatchChunk(q) => vec![
                op(Instr::Mark),
                gen(q, false),
                op(Instr::Slice(SliceMode::Pair)),
            ],
            Expr::Label(label, q) => {
                let (handler, end) = (self.labels.fresh(), self.labels.fresh());
                vec![
                    op(Instr::Checkpoint {
                        handler,
                        snapshot: true,
                    }),
                    gen(q, d),
                    op(Instr::LabelOk {
                        label: label.clone(),
                        end,
                    }),
                    mark(handler),
                    op(Instr::LabelErr {
                        label: label.clone(),
                    }),
                    mark(end),
                ]
            }
            Expr::Catch(q, mode) => {
                let (handler, end) = (self.labels.fresh(), self.labels.fresh());
                let capture = matches!(mode, CatchMode::Capture);
                let mut res = vec![
                    op(Instr::Checkpoint {
                        handler,
                        snapshot: true,
                    }),
                    gen(q, d),
                ];
                if capture && !d {
                    res.push(op(Instr::Map(Func1::new(|v| {
                        value(Ok::<Value, ParseError<T>>(v))
                    }))));
                }
                res.extend([
                    op(Instr::Release(end)),
                    mark(handler),
                    op(Instr::CatchErr {
                        mode: mode.clone(),
                        push: capture && !d,
                    }),
                    mark(end),
                ]);
                res
            }

            Expr::Call(s) => {
                let entry = *self
                    .entries
                    .get(&s.label)
                    .ok_or(CompileError::UnresolvedLabel(s.label))?;
                let mut res = vec![op(Instr::Call(entry))];
                if d {
                    res.push(op(Instr::Pop));
                }
                res
            }
            Expr::Lazy(l) => vec![gen(&l.force()?, d)],
        })
    }

    fn many(&mut self, q: &P<T>, d: bool) -> Vec<Task<T>> {
        if self.options.fuse_repetition {
            let fused = match q.as_ref() {
                Expr::Single(t, e) => Some((Pred::equals(t.clone()), e.clone())),
                Expr::Satisfy(p, e) => Some((p.clone(), e.clone())),
                _ => None,
            };
            if let Some((pred, expected)) = fused {
                return vec![op(Instr::SatisfyMany {
                    pred,
                    expected,
                    push: !d,
                })];
            }
        }

        let (body, handler, end) = (self.labels.fresh(), self.labels.fresh(), self.labels.fresh());
        let mut res = Vec::new();
        if !d {
            res.push(op(Instr::NewList));
        }
        res.extend([
            op(Instr::Checkpoint {
                handler,
                snapshot: false,
            }),
            mark(body),
            gen(q, d),
            op(Instr::Loop {
                body,
                exit: end,
                push: !d,
            }),
            mark(handler),
            op(Instr::ManyDone),
            mark(end),
        ]);
        res
    }

    fn alternation(&mut self, alts: Vec<P<T>>, d: bool) -> Vec<Task<T>> {
        if !self.options.dispatch_tables {
            return self.chain(&alts, d);
        }

        let mut seen: HashSet<T> = HashSet::new();
        let mut unknown = false;
        let mut table: Vec<(P<T>, Lead<T>)> = Vec::new();
        let mut fallback = Vec::new();
        for alt in alts.iter() {
            let l = if unknown { None } else { lead(alt, self.subroutines) };
            match l {
                Some(l) => {
                    let overlaps = l.tokens.iter().any(|t| seen.contains(t));
                    seen.extend(l.tokens.iter().cloned());
                    if overlaps {
                        fallback.push(alt.clone());
                    } else {
                        table.push((alt.clone(), l));
                    }
                }
                None => {
                    unknown = true;
                    fallback.push(alt.clone());
                }
            }
        }

        if table.len() < 2 {
            return self.chain(&alts, d);
        }
        self.tables += 1;
        log::debug!(
            "dispatch table over {} alternatives, {} in the fallback chain",
            table.len(),
            fallback.len()
        );

        let end = self.labels.fresh();
        let fallback_entry = (!fallback.is_empty()).then(|| self.labels.fresh());
        let targets: Vec<Label> = table.iter().map(|_| self.labels.fresh()).collect();

        let mut index = HashMap::new();
        for (k, (_, l)) in table.iter().enumerate() {
            for t in &l.tokens {
                index.insert(t.clone(), k);
            }
        }
        let sets = table.iter().map(|(_, l)| l.expected.clone()).collect_vec();
        let mut before = ExpectedSet::prefix_unions(&sets);
        let all = before.pop().unwrap_or_default();

        let mut res = vec![op(Instr::Dispatch {
            table: Rc::new(index),
            targets: targets.clone(),
            before,
            all,
            fallback: fallback_entry,
        })];

        // what the alternatives after each one expect, sharing one list like `before`
        let reversed = sets.iter().skip(1).rev().cloned().collect_vec();
        let mut later = ExpectedSet::prefix_unions(&reversed);
        later.reverse();

        for (k, ((alt, _), after)) in table.iter().zip(later).enumerate() {
            res.push(mark(targets[k]));

            if fallback_entry.is_none() && after.is_empty() {
                res.extend([gen(alt, d), op(Instr::Jump(end))]);
                continue;
            }

            let handler = self.labels.fresh();
            res.extend([
                op(Instr::Checkpoint {
                    handler,
                    snapshot: false,
                }),
                gen(alt, d),
                op(Instr::Commit(end)),
                mark(handler),
                op(Instr::Recover),
            ]);
            match fallback_entry {
                Some(f) => {
                    if !after.is_empty() {
                        res.push(op(Instr::Hint { expected: after }));
                    }
                    res.push(op(Instr::Jump(f)));
                }
                None => res.push(op(Instr::Expect { expected: after })),
            }
        }

        if let Some(f) = fallback_entry {
            res.push(mark(f));
            res.extend(self.chain(&fallback, d));
        }
        res.push(mark(end));
        res
    }

    /// Plain backtracking over `alts`, in order.
    fn chain(&mut self, alts: &[P<T>], d: bool) -> Vec<Task<T>> {
        let Some((last, init)) = alts.split_last() else {
            return vec![op(Instr::Empty)];
        };
        let end = self.labels.fresh();
        let mut res = Vec::new();
        for alt in init {
            let handler = self.labels.fresh();
            res.extend([
                op(Instr::Checkpoint {
                    handler,
                    snapshot: false,
                }),
                gen(alt, d),
                op(Instr::Commit(end)),
                mark(handler),
                op(Instr::Recover),
            ]);
        }
        res.push(gen(last, d));
        res.push(mark(end));
        res
    }
}

/// The operands of a chain of alternatives, in order.
fn alternatives<T>(a: &P<T>, b: &P<T>) -> Vec<P<T>> {
    let mut res = Vec::new();
    let mut stack = vec![b, a];
    while let Some(p) = stack.pop() {
        match p.as_ref() {
            Expr::Alt(x, y) => {
                stack.push(y);
                stack.push(x);
            }
            _ => res.push(p.clone()),
        }
    }
    res
}

/// Generates code for the main expression and every subroutine.
pub fn generate<T: Token>(
    bound: &Bound<T>,
    options: &CompileOptions,
) -> Result<Assembly<T>, CompileError> {
    let mut labels = Labels::default();
    let entries: HashMap<u32, Label> = bound
        .subroutines
        .keys()
        .map(|&k| (k, labels.fresh()))
        .collect();

    let mut generator = Generator {
        options,
        subroutines: &bound.subroutines,
        entries,
        labels,
        tables: 0,
    };

    let main = generator.block(&bound.main)?;
    let mut subroutines = BTreeMap::new();
    for (&k, sub) in &bound.subroutines {
        let code = generator.block(&sub.body)?;
        subroutines.insert(
            k,
            Block {
                entry: generator.entries[&k],
                code,
                recursive: sub.recursive,
            },
        );
    }

    let assembly = Assembly {
        main,
        subroutines,
        labels: generator.labels,
    };
    log::debug!(
        "generated {} instructions, {} dispatch tables",
        assembly.size(),
        generator.tables
    );
    Ok(assembly)
}
