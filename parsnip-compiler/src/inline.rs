//! Inlining of small subroutines.

use crate::codegen::{Assembly, Block};
use crate::config::CompileOptions;
use crate::instruction::{Asm, Instr, Label, Labels};
use crate::token::Token;
use std::collections::HashMap;
use std::convert::Infallible;

/// A copy of `code` with every label it defines replaced by a fresh one.
fn relabel<T: Token>(code: &[Asm<T>], labels: &mut Labels) -> Vec<Asm<T>> {
    let renamed: HashMap<Label, Label> = code
        .iter()
        .filter_map(|a| match a {
            Asm::Mark(l) => Some((*l, labels.fresh())),
            Asm::Op(_) => None,
        })
        .collect();

    code.iter()
        .map(|a| match a {
            Asm::Mark(l) => Asm::Mark(renamed[l]),
            Asm::Op(i) => {
                let i = i.retarget(|l| Ok::<_, Infallible>(*renamed.get(l).unwrap_or(l)));
                match i {
                    Ok(i) => Asm::Op(i),
                    Err(never) => match never {},
                }
            }
        })
        .collect()
}

fn size<T>(code: &[Asm<T>]) -> usize {
    code.iter().filter(|a| matches!(a, Asm::Op(_))).count()
}

fn calls<T>(code: &[Asm<T>]) -> impl Iterator<Item = Label> + '_ {
    code.iter().filter_map(|a| match a {
        Asm::Op(Instr::Call(l)) => Some(*l),
        _ => None,
    })
}

/// Inlines every call to a small, non-recursive subroutine and drops the subroutine.
/// Returns the number of call sites replaced.
pub fn inline<T: Token>(assembly: &mut Assembly<T>, options: &CompileOptions) -> usize {
    if options.inline_threshold == 0 {
        return 0;
    }

    let mut total = 0;
    for _ in 0..options.max_passes.max(1) {
        let small: HashMap<Label, u32> = assembly
            .subroutines
            .iter()
            .filter(|(_, b)| !b.recursive && size(&b.code) <= options.inline_threshold)
            .map(|(&k, b)| (b.entry, k))
            .collect();

        // Only subroutines that call no other candidate are inlined in this pass, so
        // no copy ever refers to a subroutine that is being removed.
        let bodies: HashMap<Label, Block<T>> = small
            .iter()
            .filter(|(entry, k)| {
                let code = &assembly.subroutines[*k].code;
                calls(code).all(|c| c != **entry && !small.contains_key(&c))
            })
            .map(|(&entry, k)| (entry, assembly.subroutines[k].clone()))
            .collect();
        if bodies.is_empty() {
            break;
        }

        let mut replaced = 0;
        let labels = &mut assembly.labels;
        for code in std::iter::once(&mut assembly.main)
            .chain(assembly.subroutines.values_mut().map(|b| &mut b.code))
        {
            if !calls(code).any(|c| bodies.contains_key(&c)) {
                continue;
            }
            let mut res = Vec::with_capacity(code.len());
            for a in code.drain(..) {
                if let Asm::Op(Instr::Call(l)) = &a {
                    if let Some(callee) = bodies.get(l) {
                        res.extend(relabel(&callee.code, labels));
                        replaced += 1;
                        continue;
                    }
                }
                res.push(a);
            }
            *code = res;
        }

        assembly
            .subroutines
            .retain(|_, b| !bodies.contains_key(&b.entry));
        log::debug!("inlined {} subroutines at {replaced} call sites", bodies.len());
        total += replaced;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExpectedSet;
    use crate::instruction::Output;
    use std::collections::BTreeMap;

    fn single(c: char) -> Asm<char> {
        Asm::Op(Instr::Single {
            token: c,
            expected: ExpectedSet::empty(),
            out: Output::Keep,
        })
    }

    #[test]
    fn small_subroutines_are_inlined_with_fresh_labels() {
        let mut labels = Labels::default();
        let (entry, inner) = (labels.fresh(), labels.fresh());
        let body = vec![Asm::Mark(inner), single('a'), Asm::Op(Instr::Jump(inner))];
        let mut assembly = Assembly {
            main: vec![Asm::Op(Instr::Call(entry)), Asm::Op(Instr::Call(entry))],
            subroutines: BTreeMap::from([(
                0,
                Block {
                    entry,
                    code: body,
                    recursive: false,
                },
            )]),
            labels,
        };

        assert_eq!(inline(&mut assembly, &CompileOptions::default()), 2);
        assert!(assembly.subroutines.is_empty());
        let marks: Vec<Label> = assembly
            .main
            .iter()
            .filter_map(|a| match a {
                Asm::Mark(l) => Some(*l),
                Asm::Op(_) => None,
            })
            .collect();
        assert_eq!(marks.len(), 2);
        assert_ne!(marks[0], marks[1]);
        assert!(matches!(&assembly.main[2], Asm::Op(Instr::Jump(l)) if *l == marks[0]));
    }

    #[test]
    fn recursive_subroutines_stay() {
        let mut labels = Labels::default();
        let entry = labels.fresh();
        let mut assembly = Assembly {
            main: vec![Asm::Op(Instr::Call(entry))],
            subroutines: BTreeMap::from([(
                0,
                Block {
                    entry,
                    code: vec![single('a'), Asm::Op(Instr::Call(entry))],
                    recursive: true,
                },
            )]),
            labels,
        };
        assert_eq!(inline(&mut assembly, &CompileOptions::default()), 0);
        assert_eq!(assembly.subroutines.len(), 1);
    }
}
