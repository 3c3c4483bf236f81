mod common;

use common::{document, json, scalar, Json, DOCUMENTS};
use parsnip::{ErrorItem, Outcome, Streaming};
use pretty_assertions::assert_eq;

#[ctor::ctor]
fn init() {
    env_logger::init();
}

fn chars(s: &str) -> Vec<char> {
    s.chars().collect()
}

#[test]
fn keywords() {
    let compiled = scalar().compile().unwrap();
    assert_eq!(
        compiled.parse_str("true"),
        Outcome::Done {
            value: Json::Bool(true),
            rest: vec![],
        }
    );
}

#[test]
fn truncated_keywords_expect_the_keyword() {
    let compiled = scalar().compile().unwrap();
    let Outcome::Failure { error, rest } = compiled.parse_str("nul") else {
        panic!("expected a failure");
    };
    assert_eq!(error.offset(), 3);
    assert_eq!(error.unexpected(), Some(&ErrorItem::EndOfInput));
    assert!(error
        .expected()
        .unwrap()
        .contains(&ErrorItem::Tokens(chars("null"))));
    assert!(rest.is_empty());
}

#[test]
fn nested_documents() {
    let compiled = document().compile().unwrap();
    let value = compiled
        .parse_str(" {\"a\": [true, false, null], \"b\": {\"c\": \"d\"}, \"n\": -12} ")
        .into_result()
        .unwrap();
    assert_eq!(
        value,
        Json::Object(vec![
            (
                "a".into(),
                Json::Array(vec![Json::Bool(true), Json::Bool(false), Json::Null])
            ),
            (
                "b".into(),
                Json::Object(vec![("c".into(), Json::Str("d".into()))])
            ),
            ("n".into(), Json::Number(-12.0)),
        ])
    );
}

#[test]
fn dangling_separators_point_at_the_missing_value() {
    let compiled = document().compile().unwrap();
    let error = compiled.parse_str("[1, 2,]").into_result().unwrap_err();
    assert_eq!(error.offset(), 6);
    assert_eq!(error.unexpected(), Some(&ErrorItem::Tokens(vec![']'])));
    let expected = error.expected().unwrap();
    for item in [
        ErrorItem::Label("number".into()),
        ErrorItem::Label("string".into()),
        ErrorItem::Tokens(chars("null")),
        ErrorItem::Tokens(vec!['[']),
        ErrorItem::Tokens(vec!['{']),
    ] {
        assert!(expected.contains(&item), "{item:?} missing from {expected:?}");
    }
}

#[test]
fn remainders_are_left_alone() {
    let compiled = json().compile().unwrap();
    assert_eq!(
        compiled.parse_str("[1] tail"),
        Outcome::Done {
            value: Json::Array(vec![Json::Number(1.0)]),
            rest: chars("tail"),
        }
    );
}

#[test]
fn streaming_in_single_tokens() {
    let compiled = document().compile().unwrap();
    for doc in DOCUMENTS {
        let input = chars(doc);
        let mut state = compiled.parse_streaming(&[]);
        for c in &input {
            state = match state {
                Streaming::Partial(s) => s.resume(Some(std::slice::from_ref(c))),
                complete => panic!("completed before the end of the stream: {complete:?}"),
            };
        }
        assert_eq!(state.into_outcome_or_end(), compiled.parse(&input), "{doc:?}");
    }
}

#[test]
fn streaming_at_every_split() {
    let compiled = json().compile().unwrap();
    for doc in DOCUMENTS {
        let input = chars(doc);
        let whole = compiled.parse(&input);
        for split in 0..=input.len() {
            let (first, second) = input.split_at(split);
            let streamed = match compiled.parse_streaming(first) {
                Streaming::Partial(s) => s.finish([second]),
                Streaming::Complete(o) => panic!("completed before the end of the stream: {o:?}"),
            };
            assert_eq!(streamed, whole, "{doc:?} split at {split}");
        }
    }
}
