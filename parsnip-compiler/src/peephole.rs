//! Peephole cleanup of generated code.
//!
//! Adjacent instructions that only shuffle a value through the data stack are fused,
//! jumps to the very next instruction are dropped and jumps to jumps are threaded.
//! Rewrites never cross a label mark, since a mark is a place control can enter.

use crate::codegen::Assembly;
use crate::instruction::{Asm, Instr, Label, Output};
use crate::token::Token;
use std::collections::{HashMap, HashSet};

/// Fuses the last two instructions of `code` if possible. Returns whether it did.
fn fuse_tail<T: Token>(code: &mut Vec<Asm<T>>) -> bool {
    let n = code.len();
    if n < 2 {
        return false;
    }
    let (Asm::Op(a), Asm::Op(b)) = (&code[n - 2], &code[n - 1]) else {
        return false;
    };

    let fused: Vec<Instr<T, Label>> = match (a, b) {
        (Instr::Push(_), Instr::Pop) => vec![],
        (Instr::Push(v), Instr::Map(f)) => vec![Instr::Push(f.call(v.clone()))],
        (Instr::Map(f), Instr::Map(g)) => vec![Instr::Map(f.then(g))],
        (Instr::Map(_), Instr::Pop) => vec![Instr::Pop],
        (Instr::SatisfyMany { pred, expected, push: true }, Instr::Pop) => {
            vec![Instr::SatisfyMany {
                pred: pred.clone(),
                expected: expected.clone(),
                push: false,
            }]
        }
        (consuming, Instr::Map(f)) => match with_output(consuming, |o| o.then(f)) {
            Some(i) => vec![i],
            None => return false,
        },
        (consuming, Instr::Pop) => match with_output(consuming, |_| Output::Discard) {
            Some(i) => vec![i],
            None => return false,
        },
        _ => return false,
    };

    code.truncate(n - 2);
    code.extend(fused.into_iter().map(Asm::Op));
    true
}

/// Rebuilds a consuming instruction with a new output, if it produces one.
fn with_output<T: Token>(
    i: &Instr<T, Label>,
    f: impl FnOnce(&Output) -> Output,
) -> Option<Instr<T, Label>> {
    Some(match i {
        Instr::Single {
            token,
            expected,
            out,
        } if !matches!(out, Output::Discard) => Instr::Single {
            token: token.clone(),
            expected: expected.clone(),
            out: f(out),
        },
        Instr::Satisfy {
            pred,
            expected,
            out,
        } if !matches!(out, Output::Discard) => Instr::Satisfy {
            pred: pred.clone(),
            expected: expected.clone(),
            out: f(out),
        },
        Instr::Literal {
            tokens,
            value,
            expected,
            out,
        } if !matches!(out, Output::Discard) => Instr::Literal {
            tokens: tokens.clone(),
            value: value.clone(),
            expected: expected.clone(),
            out: f(out),
        },
        _ => return None,
    })
}

/// One fusion pass over a block. Returns the number of rewrites.
fn fuse_block<T: Token>(code: &mut Vec<Asm<T>>) -> usize {
    let mut fired = 0;
    let mut res: Vec<Asm<T>> = Vec::with_capacity(code.len());
    for a in code.drain(..) {
        if let Asm::Mark(l) = &a {
            let last_op = res.iter().rposition(|x| matches!(x, Asm::Op(_)));
            if let Some(pos) = last_op {
                if matches!(&res[pos], Asm::Op(Instr::Jump(j)) if j == l) {
                    res.remove(pos);
                    fired += 1;
                }
            }
            res.push(a);
            continue;
        }

        res.push(a);
        while fuse_tail(&mut res) {
            fired += 1;
        }
    }
    *code = res;
    fired
}

/// Redirects jumps whose target is itself a jump. Returns the number of rewrites.
fn thread_jumps<T>(code: &mut [Asm<T>]) -> usize {
    // label -> where the jump right after it goes
    let mut forward: HashMap<Label, Label> = HashMap::new();
    let mut pending = Vec::new();
    for a in code.iter() {
        match a {
            Asm::Mark(l) => pending.push(*l),
            Asm::Op(Instr::Jump(t)) => {
                for l in pending.drain(..) {
                    forward.insert(l, *t);
                }
            }
            Asm::Op(_) => pending.clear(),
        }
    }

    let mut fired = 0;
    for a in code.iter_mut() {
        let Asm::Op(Instr::Jump(t)) = a else {
            continue;
        };
        let mut seen = HashSet::from([*t]);
        let mut target = *t;
        while let Some(&next) = forward.get(&target) {
            if !seen.insert(next) {
                break;
            }
            target = next;
        }
        if target != *t {
            *t = target;
            fired += 1;
        }
    }
    fired
}

/// Runs fusion and jump threading over every block until nothing changes.
pub fn optimize<T: Token>(assembly: &mut Assembly<T>, max_passes: usize) {
    let mut total = 0;
    for _ in 0..max_passes.max(1) {
        let mut fired = 0;
        for code in std::iter::once(&mut assembly.main)
            .chain(assembly.subroutines.values_mut().map(|b| &mut b.code))
        {
            fired += fuse_block(code);
            fired += thread_jumps(code);
        }
        total += fired;
        if fired == 0 {
            break;
        }
    }
    log::debug!("peephole: {total} rewrites, {} instructions left", assembly.size());
}
