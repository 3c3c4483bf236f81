#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
//! ## This Documentation
//!
//! * [Building parsers](Parser)
//! * [Running them](Compiled), [on streams](Streaming)
//! * [Char](chars) and [byte](bytes) front-ends
//! * [The compiler](compiler)
#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]
#![allow(unknown_lints)]
#![allow(unexpected_cfgs)]

pub use parsnip_compiler as compiler;
pub use parsnip_compiler::{
    CompileError, CompileOptions, CustomError, Either, ErrorItem, ExpectedSet, FancyItem,
    ParseError, Program, Token,
};

mod machine;

mod parser;
pub use parser::{
    choice, empty, eof, fail, fail_custom, lazy, literal, pure, recursive, satisfy,
    satisfy_labeled, token, unexpected, Deferred, Parser,
};

mod outcome;
pub use outcome::{Compiled, Outcome};

mod stream;
pub use stream::{Streaming, Suspended};

pub mod bytes;
pub mod chars;
