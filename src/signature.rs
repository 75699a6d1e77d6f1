// ABOUTME: Signature DSL: `(p1 :T1, p2 :T2) -> Tret` parsing, validation, and prompt rendering

use crate::value::{OrderedMap, Value};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, opt},
    multi::separated_list0,
    sequence::{delimited, preceded, separated_pair},
    IResult, Parser,
};

/// A parsed signature type, per §4.7.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Int,
    Float,
    String,
    Bool,
    Keyword,
    Any,
    Map,
    Optional(Box<Type>),
    List(Box<Type>),
    Record(Vec<(String, Type)>),
    ResultError { result: Box<Type>, error: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub params: Vec<Param>,
    pub ret: Type,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid signature at byte {position}: {message}")]
pub struct SignatureParseError {
    pub message: String,
    pub position: usize,
}

/// One mismatch found during validation, with a JSON-pointer-ish `path`
/// identifying exactly where (Invariant 6: at least one path must name the
/// precise mismatch).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

fn ident(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-')(input)
}

fn ws(input: &str) -> IResult<&str, ()> {
    map(multispace0, |_| ()).parse(input)
}

fn type_name(input: &str) -> IResult<&str, Type> {
    let (input, _) = char(':')(input)?;
    let (input, name) = take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-')(input)?;
    let ty = match name {
        "int" => Type::Int,
        "float" => Type::Float,
        "string" => Type::String,
        "bool" => Type::Bool,
        "keyword" => Type::Keyword,
        "any" => Type::Any,
        "map" => Type::Map,
        other => return Err(nom::Err::Error(nom::error::Error::new(other, nom::error::ErrorKind::Tag))),
    };
    Ok((input, ty))
}

fn list_type(input: &str) -> IResult<&str, Type> {
    map(delimited(char('['), parse_type, char(']')), |t| Type::List(Box::new(t))).parse(input)
}

fn field(input: &str) -> IResult<&str, (String, Type)> {
    let (input, _) = ws(input)?;
    let (input, name) = ident(input)?;
    let (input, _) = ws(input)?;
    let (input, ty) = parse_type(input)?;
    Ok((input, (name.to_string(), ty)))
}

fn record_or_result_type(input: &str) -> IResult<&str, Type> {
    let (input, fields) = delimited(
        char('{'),
        separated_list0((ws, char(','), ws), field),
        (ws, char('}')),
    )
    .parse(input)?;

    if fields.len() <= 2 && fields.iter().any(|(name, _)| name == "result") {
        let result_field = fields.iter().find(|(n, _)| n == "result").cloned();
        let error_field = fields.iter().find(|(n, _)| n == "error").cloned();
        if let Some((_, result_ty)) = result_field {
            let error_name = error_field.map(|(_, ty)| match ty {
                Type::Keyword => "keyword".to_string(),
                Type::Optional(inner) if matches!(*inner, Type::Keyword) => "keyword?".to_string(),
                _ => "keyword".to_string(),
            });
            return Ok((input, Type::ResultError { result: Box::new(result_ty), error: error_name }));
        }
    }
    Ok((input, Type::Record(fields)))
}

fn parse_type(input: &str) -> IResult<&str, Type> {
    let (input, base) = alt((type_name, list_type, record_or_result_type)).parse(input)?;
    let (input, nullable) = opt(char('?')).parse(input)?;
    Ok((input, if nullable.is_some() { Type::Optional(Box::new(base)) } else { base }))
}

fn param(input: &str) -> IResult<&str, Param> {
    let (input, _) = ws(input)?;
    let (input, name) = ident(input)?;
    let (input, _) = ws(input)?;
    let (input, ty) = parse_type(input)?;
    Ok((input, Param { name: name.to_string(), ty }))
}

fn params(input: &str) -> IResult<&str, Vec<Param>> {
    delimited(char('('), separated_list0((ws, char(','), ws), param), (ws, char(')'))).parse(input)
}

fn signature(input: &str) -> IResult<&str, Signature> {
    let (input, _) = ws(input)?;
    let (input, params) = params(input)?;
    let (input, _) = ws(input)?;
    let (input, (_, ret)) = separated_pair(tag("->"), ws, parse_type).parse(input)?;
    Ok((input, Signature { params, ret }))
}

impl Signature {
    pub fn parse(s: &str) -> Result<Signature, SignatureParseError> {
        match preceded(ws, signature).parse(s) {
            Ok((remaining, sig)) if remaining.trim().is_empty() => Ok(sig),
            Ok((remaining, _)) => Err(SignatureParseError {
                message: format!("unexpected trailing input: {remaining:?}"),
                position: s.len() - remaining.len(),
            }),
            Err(_) => Err(SignatureParseError {
                message: "could not parse signature".to_string(),
                position: 0,
            }),
        }
    }

    pub fn validate(&self, v: &Value) -> Vec<ValidationIssue> {
        validate_type(&self.ret, v, "$")
    }
}

fn type_name_for_error(ty: &Type) -> &'static str {
    match ty {
        Type::Int => "int",
        Type::Float => "float",
        Type::String => "string",
        Type::Bool => "bool",
        Type::Keyword => "keyword",
        Type::Any => "any",
        Type::Map => "map",
        Type::Optional(_) => "optional",
        Type::List(_) => "list",
        Type::Record(_) => "record",
        Type::ResultError { .. } => "result",
    }
}

fn validate_type(ty: &Type, v: &Value, path: &str) -> Vec<ValidationIssue> {
    match ty {
        Type::Any => vec![],
        Type::Int => mismatch_unless(matches!(v, Value::Int(_)), ty, v, path),
        Type::Float => mismatch_unless(matches!(v, Value::Float(_)), ty, v, path),
        Type::String => mismatch_unless(matches!(v, Value::String(_)), ty, v, path),
        Type::Bool => mismatch_unless(matches!(v, Value::Bool(_)), ty, v, path),
        Type::Keyword => mismatch_unless(matches!(v, Value::Keyword(_)), ty, v, path),
        Type::Map => mismatch_unless(matches!(v, Value::Map(_)), ty, v, path),
        Type::Optional(inner) => {
            if matches!(v, Value::Nil) {
                vec![]
            } else {
                validate_type(inner, v, path)
            }
        }
        Type::List(inner) => match v {
            Value::Vector(items) => items
                .iter()
                .enumerate()
                .flat_map(|(i, item)| validate_type(inner, item, &format!("{path}[{i}]")))
                .collect(),
            other => mismatch_unless(false, ty, other, path),
        },
        Type::Record(fields) => match v {
            Value::Map(map) => fields
                .iter()
                .flat_map(|(name, field_ty)| {
                    let field_path = format!("{path}.{name}");
                    match map.get(&Value::keyword(name.as_str())) {
                        Some(field_value) => validate_type(field_ty, field_value, &field_path),
                        None if matches!(field_ty, Type::Optional(_)) => vec![],
                        None => vec![ValidationIssue {
                            path: field_path,
                            message: format!("missing required field {name:?}"),
                        }],
                    }
                })
                .collect(),
            other => mismatch_unless(false, ty, other, path),
        },
        Type::ResultError { result, .. } => match v {
            Value::Map(map) => match map.get(&Value::keyword("ok")) {
                Some(ok_value) => validate_type(result, ok_value, &format!("{path}.ok")),
                None => match map.get(&Value::keyword("error")) {
                    Some(_) => vec![],
                    None => vec![ValidationIssue {
                        path: path.to_string(),
                        message: "expected a {:ok value} or {:error reason} map".to_string(),
                    }],
                },
            },
            other => mismatch_unless(false, ty, other, path),
        },
    }
}

fn mismatch_unless(ok: bool, ty: &Type, v: &Value, path: &str) -> Vec<ValidationIssue> {
    if ok {
        vec![]
    } else {
        vec![ValidationIssue {
            path: path.to_string(),
            message: format!("expected {}, got {}", type_name_for_error(ty), v.type_name()),
        }]
    }
}

/// Builds an example value conforming to `ty`, used by the prompt builder's
/// expected-output example and by the render→parse→validate round-trip law.
pub fn render_example(ty: &Type) -> Value {
    match ty {
        Type::Int => Value::Int(0),
        Type::Float => Value::Float(0.0),
        Type::String => Value::string("example"),
        Type::Bool => Value::Bool(true),
        Type::Keyword => Value::keyword("example"),
        Type::Any => Value::Nil,
        Type::Map => Value::map(OrderedMap::new()),
        Type::Optional(inner) => render_example(inner),
        Type::List(inner) => Value::vector(vec![render_example(inner)]),
        Type::Record(fields) => {
            let mut map = OrderedMap::new();
            for (name, field_ty) in fields {
                map.insert(Value::keyword(name.as_str()), render_example(field_ty));
            }
            Value::map(map)
        }
        Type::ResultError { result, .. } => {
            let mut map = OrderedMap::new();
            map.insert(Value::keyword("ok"), render_example(result));
            Value::map(map)
        }
    }
}

/// A compact Clojure-shaped rendering, the inverse of parsing, used by the
/// system-prompt builder's tool catalog.
pub fn render_type(ty: &Type) -> String {
    match ty {
        Type::Int => ":int".to_string(),
        Type::Float => ":float".to_string(),
        Type::String => ":string".to_string(),
        Type::Bool => ":bool".to_string(),
        Type::Keyword => ":keyword".to_string(),
        Type::Any => ":any".to_string(),
        Type::Map => ":map".to_string(),
        Type::Optional(inner) => format!("{}?", render_type(inner)),
        Type::List(inner) => format!("[{}]", render_type(inner)),
        Type::Record(fields) => {
            let rendered: Vec<String> = fields.iter().map(|(n, t)| format!("{n} {}", render_type(t))).collect();
            format!("{{{}}}", rendered.join(", "))
        }
        Type::ResultError { result, error } => {
            let error_ty = error.clone().unwrap_or_else(|| "keyword".to_string());
            format!("{{result {}, error :{error_ty}}}", render_type(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_flat_record_return_signature() {
        let sig = Signature::parse("() -> {total :float}").unwrap();
        assert!(sig.params.is_empty());
        assert_eq!(sig.ret, Type::Record(vec![("total".to_string(), Type::Float)]));
    }

    #[test]
    fn parses_params_and_nullable_list() {
        let sig = Signature::parse("(items [:int]?) -> :bool").unwrap();
        assert_eq!(sig.params[0].name, "items");
        assert_eq!(sig.params[0].ty, Type::Optional(Box::new(Type::List(Box::new(Type::Int)))));
        assert_eq!(sig.ret, Type::Bool);
    }

    #[test]
    fn validate_reports_a_precise_path_on_type_mismatch() {
        let sig = Signature::parse("() -> {total :float}").unwrap();
        let mut map = OrderedMap::new();
        map.insert(Value::keyword("total"), Value::string("nope"));
        let issues = sig.validate(&Value::map(map));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "$.total");
        assert!(issues[0].message.contains("float"));
    }

    #[test]
    fn validate_accepts_matching_values() {
        let sig = Signature::parse("() -> {total :float}").unwrap();
        let mut map = OrderedMap::new();
        map.insert(Value::keyword("total"), Value::Float(3.5));
        assert!(sig.validate(&Value::map(map)).is_empty());
    }

    #[test]
    fn render_example_round_trips_through_validate() {
        let sig = Signature::parse("() -> {n :int, label :string?}").unwrap();
        let example = render_example(&sig.ret);
        assert!(sig.validate(&example).is_empty());
    }
}
