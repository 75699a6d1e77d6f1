// ABOUTME: Parser module for PTC-Lisp source, built on nom combinators

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace1, one_of},
    combinator::{map, opt, recognize, value},
    multi::many0,
    sequence::pair,
    IResult, Parser,
};
use nom_locate::LocatedSpan;

use crate::ast::{Ast, Span};
use crate::error::EvalError;
use crate::value::Symbol;

/// Input type threaded through every combinator: a plain `&str` fragment
/// plus the line/column of its start, so every `Ast` node can carry its
/// real source position instead of a placeholder.
type Input<'a> = LocatedSpan<&'a str>;

fn span_of(i: Input) -> Span {
    Span {
        line: i.location_line(),
        col: i.get_utf8_column() as u32,
    }
}

/// Skip whitespace and `;`-to-end-of-line comments.
fn ws_and_comments(input: Input) -> IResult<Input, ()> {
    let comment = (char(';'), take_while(|c| c != '\n'));
    many0(alt((value((), multispace1), value((), comment))))
        .map(|_| ())
        .parse(input)
}

fn parse_number(input: Input) -> IResult<Input, Ast> {
    let start = span_of(input);
    let (rest, text) = recognize(pair(
        opt(char('-')),
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit1)))),
            recognize(pair(char('.'), digit1)),
        )),
    ))
    .parse(input)?;
    let text = *text.fragment();

    if text.contains('.') {
        let n: f64 = text.parse().unwrap();
        Ok((rest, Ast::Float(n, start)))
    } else {
        match text.parse::<i64>() {
            Ok(n) => Ok((rest, Ast::Int(n, start))),
            Err(_) => Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Digit,
            ))),
        }
    }
}

fn parse_bool(input: Input) -> IResult<Input, Ast> {
    let start = span_of(input);
    alt((
        value(Ast::Bool(true, start), tag("true")),
        value(Ast::Bool(false, start), tag("false")),
    ))
    .parse(input)
}

fn parse_nil(input: Input) -> IResult<Input, Ast> {
    let start = span_of(input);
    value(Ast::Nil(start), tag("nil")).parse(input)
}

const SYMBOL_HEAD: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ+-*/%<>=!?_";

fn is_symbol_tail(c: char) -> bool {
    c.is_alphanumeric()
        || matches!(
            c,
            '-' | '_' | '?' | '!' | '<' | '>' | '=' | '+' | '*' | '/' | '%' | '.'
        )
}

fn parse_bare_name(input: Input) -> IResult<Input, String> {
    let (input, first) = one_of(SYMBOL_HEAD)(input)?;
    let (input, rest) = take_while(is_symbol_tail)(input)?;
    let mut name = String::new();
    name.push(first);
    name.push_str(rest.fragment());
    Ok((input, name))
}

fn parse_symbol(input: Input) -> IResult<Input, Ast> {
    let start = span_of(input);
    let (input, first) = parse_bare_name(input)?;
    if let Ok((rest, _)) = char::<_, nom::error::Error<Input>>('/')(input) {
        if let Ok((rest, second)) = parse_bare_name(rest) {
            return Ok((rest, Ast::Symbol(Symbol::namespaced(first, second), start)));
        }
    }
    Ok((input, Ast::Symbol(Symbol::plain(first), start)))
}

fn parse_keyword(input: Input) -> IResult<Input, Ast> {
    let start = span_of(input);
    let (input, _) = char(':')(input)?;
    let (input, first) = parse_bare_name(input)?;
    if let Ok((rest, _)) = char::<_, nom::error::Error<Input>>('/')(input) {
        if let Ok((rest, second)) = parse_bare_name(rest) {
            return Ok((rest, Ast::Keyword(Symbol::namespaced(first, second), start)));
        }
    }
    Ok((input, Ast::Keyword(Symbol::plain(first), start)))
}

fn parse_string(input: Input) -> IResult<Input, Ast> {
    let start = span_of(input);
    let (input, _) = char('"')(input)?;
    let mut result = String::new();
    let mut remaining = input;
    loop {
        if let Ok((rest, _)) = char::<_, nom::error::Error<Input>>('"')(remaining) {
            return Ok((rest, Ast::String(result.into(), start)));
        }
        if let Ok((rest, _)) = char::<_, nom::error::Error<Input>>('\\')(remaining) {
            let (rest, escaped) = one_of::<_, _, nom::error::Error<Input>>("\"\\nrt")(rest)
                .map_err(|_| {
                    nom::Err::Error(nom::error::Error::new(rest, nom::error::ErrorKind::Escaped))
                })?;
            result.push(match escaped {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                other => other,
            });
            remaining = rest;
            continue;
        }
        let (rest, chunk) =
            take_while1::<_, _, nom::error::Error<Input>>(|c| c != '"' && c != '\\')(remaining)
                .map_err(|_| {
                    nom::Err::Error(nom::error::Error::new(remaining, nom::error::ErrorKind::Eof))
                })?;
        result.push_str(chunk.fragment());
        remaining = rest;
    }
}

fn delimited_seq(open: char, close: char, input: Input) -> IResult<Input, Vec<Ast>> {
    let (input, _) = char(open)(input)?;
    let (mut input, _) = ws_and_comments(input)?;
    let mut items = Vec::new();
    loop {
        if let Ok((rest, _)) = char::<_, nom::error::Error<Input>>(close)(input) {
            return Ok((rest, items));
        }
        let (rest, item) = parse_expr(input)?;
        items.push(item);
        let (rest, _) = ws_and_comments(rest)?;
        input = rest;
    }
}

fn parse_list(input: Input) -> IResult<Input, Ast> {
    let start = span_of(input);
    map(|i| delimited_seq('(', ')', i), move |items| {
        Ast::List(items, start)
    })
    .parse(input)
}

fn parse_vector(input: Input) -> IResult<Input, Ast> {
    let start = span_of(input);
    map(|i| delimited_seq('[', ']', i), move |items| {
        Ast::Vector(items, start)
    })
    .parse(input)
}

fn parse_set(input: Input) -> IResult<Input, Ast> {
    let start = span_of(input);
    let (input, _) = tag("#{")(input)?;
    let (mut input, _) = ws_and_comments(input)?;
    let mut items = Vec::new();
    loop {
        if let Ok((rest, _)) = char::<_, nom::error::Error<Input>>('}')(input) {
            return Ok((rest, Ast::Set(items, start)));
        }
        let (rest, item) = parse_expr(input)?;
        items.push(item);
        let (rest, _) = ws_and_comments(rest)?;
        input = rest;
    }
}

fn parse_map(input: Input) -> IResult<Input, Ast> {
    let start = span_of(input);
    let (input, _) = char('{')(input)?;
    let (mut input, _) = ws_and_comments(input)?;
    let mut pairs = Vec::new();
    loop {
        if let Ok((rest, _)) = char::<_, nom::error::Error<Input>>('}')(input) {
            return Ok((rest, Ast::Map(pairs, start)));
        }
        let (rest, key) = parse_expr(input)?;
        let (rest, _) = ws_and_comments(rest)?;
        let (rest, val) = parse_expr(rest)?;
        pairs.push((key, val));
        let (rest, _) = ws_and_comments(rest)?;
        input = rest;
    }
}

fn parse_quote(input: Input) -> IResult<Input, Ast> {
    let start = span_of(input);
    let (input, _) = char('\'')(input)?;
    let (input, expr) = parse_expr(input)?;
    Ok((
        input,
        Ast::List(vec![Ast::Symbol(Symbol::plain("quote"), start), expr], start),
    ))
}

fn parse_expr(input: Input) -> IResult<Input, Ast> {
    let (input, _) = ws_and_comments(input)?;
    alt((
        parse_quote,
        parse_set,
        parse_map,
        parse_vector,
        parse_list,
        parse_keyword,
        parse_string,
        parse_number,
        parse_nil,
        parse_bool,
        parse_symbol,
    ))
    .parse(input)
}

fn is_unexpected_close(input: &str) -> bool {
    matches!(input.trim_start().chars().next(), Some(')' | ']' | '}'))
}

/// Parse a full program: zero or more top-level forms, per the grammar
/// `program := expr*`.
pub fn parse_program(input: &str) -> Result<Vec<Ast>, EvalError> {
    let mut forms = Vec::new();
    let (mut remaining, _) = ws_and_comments(Input::new(input))
        .map_err(|e| EvalError::ParseError(format!("{:?}", e)))?;

    while !remaining.fragment().is_empty() {
        if is_unexpected_close(remaining.fragment()) {
            let frag = *remaining.fragment();
            return Err(EvalError::ParseError(format!(
                "unexpected closing delimiter at {}:{} near: '{}'",
                remaining.location_line(),
                remaining.get_utf8_column(),
                &frag[..frag.len().min(20)]
            )));
        }
        let (rest, form) =
            parse_expr(remaining).map_err(|e| EvalError::ParseError(format!("{:?}", e)))?;
        forms.push(form);
        let (rest, _) =
            ws_and_comments(rest).map_err(|e| EvalError::ParseError(format!("{:?}", e)))?;
        remaining = rest;
    }
    Ok(forms)
}

/// Parse exactly one top-level form, erroring on trailing input.
pub fn parse_one(input: &str) -> Result<Ast, EvalError> {
    let forms = parse_program(input)?;
    match forms.len() {
        1 => Ok(forms.into_iter().next().unwrap()),
        0 => Err(EvalError::ParseError("empty input".to_string())),
        _ => Err(EvalError::ParseError(
            "expected exactly one top-level form".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ints_and_floats() {
        assert!(matches!(parse_one("42").unwrap(), Ast::Int(42, _)));
        assert!(matches!(parse_one("-3.5").unwrap(), Ast::Float(n, _) if n == -3.5));
    }

    #[test]
    fn parses_bool_and_nil() {
        assert!(matches!(parse_one("true").unwrap(), Ast::Bool(true, _)));
        assert!(matches!(parse_one("false").unwrap(), Ast::Bool(false, _)));
        assert!(matches!(parse_one("nil").unwrap(), Ast::Nil(_)));
    }

    #[test]
    fn parses_namespaced_symbols_and_keywords() {
        match parse_one("tool/search").unwrap() {
            Ast::Symbol(sym, _) => {
                assert_eq!(sym.ns.as_deref(), Some("tool"));
                assert_eq!(&*sym.name, "search");
            }
            other => panic!("expected symbol, got {:?}", other),
        }
        match parse_one(":status").unwrap() {
            Ast::Keyword(sym, _) => assert_eq!(&*sym.name, "status"),
            other => panic!("expected keyword, got {:?}", other),
        }
    }

    #[test]
    fn parses_string_escapes() {
        match parse_one("\"a\\nb\"").unwrap() {
            Ast::String(s, _) => assert_eq!(&*s, "a\nb"),
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn parses_vector_map_set() {
        assert!(matches!(parse_one("[1 2 3]").unwrap(), Ast::Vector(v, _) if v.len() == 3));
        assert!(matches!(parse_one("{:a 1 :b 2}").unwrap(), Ast::Map(m, _) if m.len() == 2));
        assert!(matches!(parse_one("#{1 2}").unwrap(), Ast::Set(s, _) if s.len() == 2));
    }

    #[test]
    fn parses_quote_sugar() {
        match parse_one("'x").unwrap() {
            Ast::List(items, _) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(&items[0], Ast::Symbol(sym, _) if &*sym.name == "quote"));
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn program_allows_multiple_top_level_forms() {
        let forms = parse_program("(def x 1) (def y 2)").unwrap();
        assert_eq!(forms.len(), 2);
    }

    #[test]
    fn rejects_unclosed_list() {
        assert!(parse_program("(1 2").is_err());
    }

    #[test]
    fn rejects_unexpected_closing_delimiter() {
        assert!(parse_program(")").is_err());
    }

    #[test]
    fn skips_line_comments() {
        let forms = parse_program("; a comment\n42").unwrap();
        assert_eq!(forms.len(), 1);
        assert!(matches!(forms[0], Ast::Int(42, _)));
    }

    #[test]
    fn tracks_line_and_column_of_nested_forms() {
        let forms = parse_program("(def x 1)\n(if true\n    1\n    2)").unwrap();
        match &forms[1] {
            Ast::List(items, span) => {
                assert_eq!(span.line, 2);
                assert_eq!(span.col, 1);
                match &items[2] {
                    Ast::Int(1, inner_span) => assert_eq!(inner_span.line, 3),
                    other => panic!("expected int, got {:?}", other),
                }
            }
            other => panic!("expected list, got {:?}", other),
        }
    }
}
