//! The compiler half of parsnip.
//!
//! A parser is described by an expression tree ([`expr::Expr`]). [`compile`] turns
//! such a tree into a flat [`Program`] for a backtracking stack machine:
//!
//! 1. binding analysis forces forward references and extracts shared and recursive
//!    parsers into subroutines,
//! 2. the optimizer simplifies the tree algebraically,
//! 3. the code generator emits labelled instruction blocks, using dispatch tables
//!    for alternatives with disjoint leading tokens,
//! 4. a peephole pass fuses stack traffic and small subroutines are inlined,
//! 5. the linker lays out the reachable code and resolves labels.
//!
//! The machine itself lives in the `parsnip` crate.

use thiserror::Error;

#[macro_use]
mod value;

pub mod binding;
pub mod codegen;
mod config;
pub mod error;
pub mod expr;
pub mod inline;
pub mod instruction;
pub mod leading;
mod link;
pub mod optimize;
pub mod peephole;
mod token;

#[cfg(feature = "dot")]
mod dot;

pub use config::CompileOptions;
pub use error::{CustomError, ErrorItem, ErrorMap, ExpectedSet, FancyItem, Failure, ParseError};
pub use expr::{CatchMode, Expr, P};
pub use link::{link, Program};
pub use token::Token;
pub use value::{take, unit, value, Branch, Constant, Either, Func1, Func2, Pred, Value};

/// A grammar that cannot be compiled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("reference to a parser that was never defined")]
    UndefinedReference,
    #[error("a forward reference refers to itself without any parser in between")]
    CyclicReference,
    #[error("`many` over a parser ({0}) that succeeds without consuming input")]
    NonConsumingRepeat(String),
    #[error("jump to unresolved label {0}")]
    UnresolvedLabel(u32),
}

/// Compiles the parser rooted at `root`.
pub fn compile<T: Token>(root: &P<T>, options: &CompileOptions) -> Result<Program<T>, CompileError> {
    let bound = binding::bind(root)?;
    let bound = optimize::optimize(bound, options)?;
    let mut assembly = codegen::generate(&bound, options)?;

    if options.fuse_instructions {
        peephole::optimize(&mut assembly, options.max_passes);
    }
    if inline::inline(&mut assembly, options) > 0 && options.fuse_instructions {
        peephole::optimize(&mut assembly, options.max_passes);
    }

    let program = link(assembly)?;
    log::debug!("compiled program of {} instructions", program.len());
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{LazyCell, LazyRef, SeqKind};
    use crate::instruction::Instr;
    use std::rc::Rc;

    #[ctor::ctor]
    fn init() {
        env_logger::init();
    }

    fn single(c: char) -> P<char> {
        Rc::new(Expr::Single(c, ExpectedSet::single(ErrorItem::Tokens(vec![c]))))
    }

    #[test]
    fn programs_end_main_with_return() {
        let p = Rc::new(Expr::Seq(SeqKind::Left, single('a'), single('b')));
        let program = compile(&p, &CompileOptions::default()).unwrap();
        assert!(matches!(program.instructions()[..], [
            Instr::Single { .. },
            Instr::Single { .. },
            Instr::Return
        ]));
    }

    #[test]
    fn undefined_references_do_not_compile() {
        let dangling = Rc::new(Expr::Lazy(LazyRef::new(LazyCell::undefined())));
        let p = Rc::new(Expr::Alt(single('a'), dangling));
        assert_eq!(
            compile(&p, &CompileOptions::default()).unwrap_err(),
            CompileError::UndefinedReference
        );
    }

    #[test]
    fn repeating_nothing_does_not_compile() {
        let p = Rc::new(Expr::Many(Rc::new(Expr::<char>::Pure(Constant::unit()))));
        for options in [CompileOptions::default(), CompileOptions::unoptimized()] {
            assert!(matches!(
                compile(&p, &options),
                Err(CompileError::NonConsumingRepeat(_))
            ));
        }
    }

    #[test]
    fn recursive_grammars_keep_their_subroutine() {
        // p = 'a' *> p <|> 'b'
        let cell = Rc::new(LazyCell::undefined());
        let p = Rc::new(Expr::Alt(
            Rc::new(Expr::Seq(
                SeqKind::Right,
                single('a'),
                Rc::new(Expr::Lazy(LazyRef(cell.clone()))),
            )),
            single('b'),
        ));
        assert!(cell.define(p.clone()));
        let program = compile(&p, &CompileOptions::default()).unwrap();
        assert!(program
            .instructions()
            .iter()
            .any(|i| matches!(i, Instr::Call(_))));
    }

    #[test]
    fn deeply_nested_grammars_compile() {
        let mut p = single('a');
        for _ in 0..50_000 {
            p = Rc::new(Expr::Chunk(Rc::new(Expr::MatchChunk(p))));
        }
        for options in [CompileOptions::default(), CompileOptions::unoptimized()] {
            let program = compile(&p, &options).unwrap();
            assert!(matches!(program.instructions().last(), Some(Instr::Return)));
        }
    }

    #[test]
    fn long_chains_compile() {
        let mut then = single('a');
        for _ in 1..10_000 {
            then = Rc::new(Expr::Seq(SeqKind::Right, then, single('a')));
        }
        let program = compile(&then, &CompileOptions::default()).unwrap();
        let singles = program
            .instructions()
            .iter()
            .filter(|i| matches!(i, Instr::Single { .. }))
            .count();
        assert_eq!(singles, 10_000);

        let tokens = (0..5_000).filter_map(|i| char::from_u32(0x4e00 + i)).collect::<Vec<_>>();
        let mut choice = single(tokens[0]);
        for &c in &tokens[1..] {
            choice = Rc::new(Expr::Alt(choice, single(c)));
        }
        let program = compile(&choice, &CompileOptions::default()).unwrap();
        assert!(program
            .instructions()
            .iter()
            .any(|i| matches!(i, Instr::Dispatch { .. })));
    }
}
