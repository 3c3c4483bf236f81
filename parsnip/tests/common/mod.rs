#![allow(dead_code)]

use parsnip::chars::{char, digit, none_of, spaces, string};
use parsnip::{choice, recursive, Parser};

#[derive(Clone, Debug, PartialEq)]
pub enum Json {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<Json>),
    Object(Vec<(String, Json)>),
}

fn lexeme<A: Clone + 'static>(p: Parser<char, A>) -> Parser<char, A> {
    p.skip(spaces())
}

pub fn number() -> Parser<char, f64> {
    char('-')
        .optional()
        .then(digit().some())
        .chunk()
        .map(|s| s.parse::<f64>().unwrap_or(f64::NAN))
        .label("number")
}

pub fn string_literal() -> Parser<char, String> {
    none_of("\"")
        .many()
        .between(char('"'), char('"'))
        .map(|cs| cs.into_iter().collect::<String>())
        .label("string")
}

/// The grammar of the end-to-end scenario: keywords, numbers and strings.
pub fn scalar() -> Parser<char, Json> {
    choice([
        string("null").as_value(Json::Null),
        string("true").as_value(Json::Bool(true)),
        string("false").as_value(Json::Bool(false)),
        number().map(Json::Number),
        string_literal().map(Json::Str),
    ])
}

/// A JSON value, followed by any whitespace.
pub fn json() -> Parser<char, Json> {
    recursive(|value| {
        let array = lexeme(char('['))
            .then(value.clone().sep_by(lexeme(char(','))))
            .skip(char(']'))
            .map(Json::Array);
        let member = lexeme(string_literal())
            .skip(lexeme(char(':')))
            .zip(value);
        let object = lexeme(char('{'))
            .then(member.sep_by(lexeme(char(','))))
            .skip(char('}'))
            .map(Json::Object);
        lexeme(choice([scalar(), array, object]))
    })
}

/// A whole document: leading whitespace, one value, end of input.
pub fn document() -> Parser<char, Json> {
    spaces().then(json()).skip(parsnip::eof())
}

pub const DOCUMENTS: &[&str] = &[
    "true",
    "nul",
    "null",
    " [1, 2, -30] ",
    "[1, 2,]",
    "{\"a\": [true, false, null], \"b\": {\"c\": \"d\"}}",
    "{\"a\" 1}",
    "tru e",
    "[[[[[]]]]]",
    "\"unterminated",
    "",
    "x",
    "-",
];
