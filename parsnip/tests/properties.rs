mod common;

use common::{document, Json, DOCUMENTS};
use parsnip::chars::{char, digit, string};
use parsnip::{CompileOptions, ErrorItem, ExpectedSet, Outcome, ParseError, Parser};
use pretty_assertions::assert_eq;

#[ctor::ctor]
fn init() {
    env_logger::init();
}

fn chars(s: &str) -> Vec<char> {
    s.chars().collect()
}

fn option_sets() -> Vec<CompileOptions> {
    vec![
        CompileOptions::default(),
        CompileOptions::unoptimized(),
        CompileOptions::default().with_optimize(false),
        CompileOptions::default().with_dispatch_tables(false),
        CompileOptions::default().with_fuse_repetition(false),
        CompileOptions::default().with_fuse_instructions(false),
        CompileOptions::default().with_inline_threshold(0),
        CompileOptions::default().with_inline_threshold(64),
        CompileOptions::default().with_max_passes(1),
    ]
}

/// Parses every input with `p` compiled under every option set and checks that the
/// outcomes agree with the default compilation.
fn assert_options_agree<A>(p: &Parser<char, A>, inputs: &[&str])
where
    A: Clone + PartialEq + std::fmt::Debug + 'static,
{
    let reference = p.compile().unwrap();
    for options in option_sets() {
        let compiled = p.compile_with(&options).unwrap();
        for input in inputs {
            assert_eq!(
                compiled.parse_str(input),
                reference.parse_str(input),
                "{input:?} with {options:?}"
            );
        }
    }
}

#[test]
fn compilation_is_deterministic() {
    let first = document().compile().unwrap();
    let second = document().compile().unwrap();
    assert_eq!(first.program().to_string(), second.program().to_string());
    for doc in DOCUMENTS {
        assert_eq!(first.parse_str(doc), second.parse_str(doc), "{doc:?}");
    }
}

#[test]
fn optimizations_preserve_outcomes() {
    assert_options_agree(&document(), DOCUMENTS);
}

#[test]
fn dispatch_tables_preserve_outcomes() {
    let keywords = string("let")
        .as_value(0)
        .or(string("in").as_value(1))
        .or(string("if").as_value(2))
        .or(char('x').as_value(3))
        .or(digit().as_value(4))
        .label("keyword");
    let p = keywords.sep_by(char(' '));
    let with = p.compile().unwrap();
    let without = p
        .compile_with(&CompileOptions::default().with_dispatch_tables(false))
        .unwrap();
    for input in ["let in if x 7", "le", "i", "in let", "x y", "", "if 9 ", "q"] {
        assert_eq!(with.parse_str(input), without.parse_str(input), "{input:?}");
    }
}

#[test]
fn repetition_stops_before_the_first_mismatch() {
    let digits = digit().many();
    assert_options_agree(&digits, &["12a", "a", "", "123"]);

    let compiled = digits.compile().unwrap();
    assert_eq!(
        compiled.parse_str("12a"),
        Outcome::Done {
            value: vec!['1', '2'],
            rest: vec!['a'],
        }
    );
    assert_eq!(
        compiled.parse_str("a"),
        Outcome::Done {
            value: vec![],
            rest: vec!['a'],
        }
    );
}

#[test]
fn repetition_fails_on_partial_elements() {
    let pairs = digit().zip(digit()).many();
    let compiled = pairs.compile().unwrap();
    let Outcome::Failure { error, .. } = compiled.parse_str("123") else {
        panic!("a half-parsed element must not end the repetition");
    };
    assert_eq!(error.offset(), 3);
    assert_eq!(error.unexpected(), Some(&ErrorItem::EndOfInput));
}

#[test]
fn attempts_rewind_before_the_next_alternative() {
    let p = char('a').then(char('b')).attempt().or(char('a'));
    assert_eq!(
        p.compile().unwrap().parse_str("ac"),
        Outcome::Done {
            value: 'a',
            rest: vec!['c'],
        }
    );

    // without the attempt the consumed 'a' commits to the first alternative
    let committed = char('a').then(char('b')).or(char('a'));
    let error = committed.compile().unwrap().parse_str("ac").into_result().unwrap_err();
    assert_eq!(error.offset(), 1);
    assert_eq!(error.unexpected(), Some(&ErrorItem::Tokens(vec!['c'])));
}

#[test]
fn the_furthest_error_wins() {
    let further = ParseError::Trivial {
        offset: 5,
        unexpected: Some(ErrorItem::Tokens(vec!['x'])),
        expected: ExpectedSet::label("a"),
    };
    let nearer = ParseError::Trivial {
        offset: 3,
        unexpected: Some(ErrorItem::Tokens(chars("longer"))),
        expected: ExpectedSet::label("b"),
    };
    assert_eq!(further.clone().merge(nearer.clone()), further);
    assert_eq!(nearer.merge(further.clone()), further);

    // the same holds for errors met while parsing
    let p = string("abcd").attempt().or(string("ab").then(string("x")));
    let error = p.compile().unwrap().parse_str("abcx").into_result().unwrap_err();
    assert_eq!(error.offset(), 3);
    assert_eq!(error.unexpected(), Some(&ErrorItem::Tokens(vec!['x'])));
}

#[test]
fn labels_replace_what_was_expected() {
    let p = string("true").or(string("false")).label("boolean");
    let error = p.compile().unwrap().parse_str("maybe").into_result().unwrap_err();
    assert_eq!(
        error,
        ParseError::Trivial {
            offset: 0,
            unexpected: Some(ErrorItem::Tokens(vec!['m'])),
            expected: ExpectedSet::label("boolean"),
        }
    );

    let hidden = char('a').hide().or(char('b'));
    let error = hidden.compile().unwrap().parse_str("c").into_result().unwrap_err();
    assert_eq!(error.expected(), Some(&ExpectedSet::single(ErrorItem::Tokens(vec!['b']))));
}

#[test]
fn lookahead_does_not_consume() {
    let p = string("ab").look_ahead().zip(char('a'));
    assert_eq!(
        p.compile().unwrap().parse_str("abc"),
        Outcome::Done {
            value: ("ab".to_string(), 'a'),
            rest: chars("bc"),
        }
    );

    let keyword = string("if").skip(char('_').or(digit()).not_followed_by());
    let compiled = keyword.compile().unwrap();
    assert!(compiled.parse_str("if x").is_done());
    let error = compiled.parse_str("if_x").into_result().unwrap_err();
    assert_eq!(error.offset(), 2);
    assert_eq!(error.unexpected(), Some(&ErrorItem::Tokens(vec!['_'])));
}

#[test]
fn unoptimized_programs_parse_documents() {
    let compiled = document()
        .compile_with(&CompileOptions::unoptimized())
        .unwrap();
    assert_eq!(
        compiled.parse_str("[null]").into_result().unwrap(),
        Json::Array(vec![Json::Null])
    );
}

#[test]
fn long_chains_parse() {
    let mut then = char('a');
    for _ in 1..10_000 {
        then = then.then(char('a'));
    }
    let input = "a".repeat(10_000);
    assert_eq!(
        then.compile().unwrap().parse_str(&input),
        Outcome::Done {
            value: 'a',
            rest: vec![],
        }
    );

    let words = (0..5_000).map(|i| format!("k{i};")).collect::<Vec<_>>();
    let keywords = parsnip::choice(words.iter().map(|w| string(w).attempt()));
    let compiled = keywords.compile().unwrap();
    assert_eq!(compiled.parse_str("k4999;").into_result().unwrap(), "k4999;");
    let error = compiled.parse_str("x").into_result().unwrap_err();
    assert_eq!(error.offset(), 0);
    assert_eq!(error.expected().map(ExpectedSet::len), Some(5_000));
}
