//! Linking: laying out the reachable blocks and resolving labels to indices.

use crate::codegen::Assembly;
use crate::instruction::{Asm, Instr, Label};
use crate::token::Token;
use crate::CompileError;
use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::rc::Rc;

/// A linked program. Cloning is cheap; any number of machines can run one program.
#[derive(Debug)]
pub struct Program<T> {
    code: Rc<[Instr<T, usize>]>,
}

impl<T> Clone for Program<T> {
    fn clone(&self) -> Self {
        Self {
            code: self.code.clone(),
        }
    }
}

impl<T> Program<T> {
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn instructions(&self) -> &[Instr<T, usize>] {
        &self.code
    }
}

impl<T: Token> Display for Program<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, instr) in self.code.iter().enumerate() {
            writeln!(f, "{i:4}: {instr}")?;
        }
        Ok(())
    }
}

/// Entry labels of the subroutines reachable from main, in ascending subroutine order.
fn reachable<T>(assembly: &Assembly<T>) -> Vec<u32> {
    let by_entry: HashMap<Label, u32> = assembly
        .subroutines
        .iter()
        .map(|(&k, b)| (b.entry, k))
        .collect();

    let mut seen = BTreeSet::new();
    let mut work = vec![&assembly.main];
    while let Some(code) = work.pop() {
        for a in code {
            let Asm::Op(Instr::Call(l)) = a else {
                continue;
            };
            if let Some(&k) = by_entry.get(l) {
                if seen.insert(k) {
                    work.push(&assembly.subroutines[&k].code);
                }
            }
        }
    }
    seen.into_iter().collect()
}

/// Lays out main followed by every reachable subroutine, each ending in a `Return`,
/// and replaces labels by instruction indices.
pub fn link<T: Token>(assembly: Assembly<T>) -> Result<Program<T>, CompileError> {
    let keep = reachable(&assembly);
    let dropped = assembly.subroutines.len() - keep.len();

    let mut layout: Vec<Asm<T>> = assembly.main;
    layout.push(Asm::Op(Instr::Return));
    let mut subroutines = assembly.subroutines;
    for k in keep {
        if let Some(block) = subroutines.remove(&k) {
            layout.push(Asm::Mark(block.entry));
            layout.extend(block.code);
            layout.push(Asm::Op(Instr::Return));
        }
    }

    let mut positions = HashMap::new();
    let mut len = 0;
    for a in &layout {
        match a {
            Asm::Mark(l) => {
                positions.insert(*l, len);
            }
            Asm::Op(_) => len += 1,
        }
    }

    let code = layout
        .iter()
        .filter_map(|a| match a {
            Asm::Op(i) => Some(i.retarget(|l| {
                positions
                    .get(l)
                    .copied()
                    .ok_or(CompileError::UnresolvedLabel(l.0))
            })),
            Asm::Mark(_) => None,
        })
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!("linked {} instructions, {dropped} unused subroutines dropped", code.len());
    Ok(Program { code: code.into() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::Block;
    use crate::instruction::Labels;
    use std::collections::BTreeMap;

    fn block(entry: Label, code: Vec<Asm<char>>) -> Block<char> {
        Block {
            entry,
            code,
            recursive: false,
        }
    }

    #[test]
    fn unreachable_subroutines_are_dropped() {
        let mut labels = Labels::default();
        let (a, b, c) = (labels.fresh(), labels.fresh(), labels.fresh());
        let assembly = Assembly {
            main: vec![Asm::Op(Instr::Call(b))],
            subroutines: BTreeMap::from([
                (0, block(a, vec![Asm::Op(Instr::Empty)])),
                (1, block(b, vec![Asm::Op(Instr::Call(c))])),
                (2, block(c, vec![Asm::Op(Instr::Pop)])),
            ]),
            labels,
        };

        let program = link(assembly).unwrap();
        let code = program.instructions();
        assert_eq!(program.len(), 6);
        assert!(matches!(code[0], Instr::Call(2)));
        assert!(matches!(code[1], Instr::Return));
        assert!(matches!(code[2], Instr::Call(4)));
        assert!(matches!(code[4], Instr::Pop));
        assert!(matches!(code[5], Instr::Return));
    }

    #[test]
    fn local_labels_resolve_to_positions() {
        let assembly = Assembly {
            main: vec![
                Asm::<char>::Op(Instr::Jump(Label(7))),
                Asm::Op(Instr::Empty),
                Asm::Mark(Label(7)),
                Asm::Op(Instr::Pop),
            ],
            subroutines: BTreeMap::new(),
            labels: Labels::default(),
        };
        let program = link(assembly).unwrap();
        assert!(matches!(program.instructions()[0], Instr::Jump(2)));
        assert_eq!(program.to_string().lines().next(), Some("   0: jump 2"));
    }

    #[test]
    fn dangling_labels_are_reported() {
        let assembly = Assembly {
            main: vec![Asm::Op(Instr::Jump(Label(3)))],
            subroutines: BTreeMap::<u32, Block<char>>::new(),
            labels: Labels::default(),
        };
        assert!(matches!(link(assembly), Err(CompileError::UnresolvedLabel(3))));
    }
}
