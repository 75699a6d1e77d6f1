// ABOUTME: Static analysis pass over parsed programs, ahead of evaluation

use crate::ast::{Ast, Span};

/// A static defect found before evaluation begins: bad arity on a special
/// form, a malformed binding vector, etc. An empty `Vec` from [`analyze`]
/// means the program is accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisError {
    pub message: String,
    pub span: Span,
}

impl AnalysisError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        AnalysisError {
            message: message.into(),
            span,
        }
    }
}

/// Analyze a full program (as returned by [`crate::parser::parse_program`])
/// for static shape errors in the special forms PTC-Lisp recognizes.
/// Ordinary function calls are arity-checked lazily at call time, since
/// arity there depends on runtime values (closures), not syntax.
pub fn analyze(forms: &[Ast]) -> Vec<AnalysisError> {
    let mut errors = Vec::new();
    for form in forms {
        analyze_form(form, &mut errors);
    }
    errors
}

fn analyze_form(ast: &Ast, errors: &mut Vec<AnalysisError>) {
    match ast {
        Ast::List(items, span) => {
            if items.is_empty() {
                return;
            }
            let head = items[0].head_name();
            match head.as_deref() {
                Some("if") => {
                    if items.len() != 4 {
                        errors.push(AnalysisError::new(
                            "if expects exactly (if cond then else)",
                            *span,
                        ));
                    }
                }
                Some("def") => {
                    if items.len() != 3 {
                        errors.push(AnalysisError::new("def expects (def name value)", *span));
                    } else if !matches!(items[1], Ast::Symbol(_, _)) {
                        errors.push(AnalysisError::new(
                            "def's first argument must be a symbol",
                            *span,
                        ));
                    }
                }
                Some("fn") => {
                    if items.len() < 2 {
                        errors.push(AnalysisError::new(
                            "fn expects (fn [params...] body...)",
                            *span,
                        ));
                    } else if !matches!(items[1], Ast::Vector(_, _)) {
                        errors.push(AnalysisError::new(
                            "fn's parameter list must be a vector",
                            *span,
                        ));
                    }
                }
                Some("defn") => {
                    if items.len() < 3 {
                        errors.push(AnalysisError::new(
                            "defn expects (defn name [params...] body...)",
                            *span,
                        ));
                    } else {
                        if !matches!(items[1], Ast::Symbol(_, _)) {
                            errors.push(AnalysisError::new(
                                "defn's first argument must be a symbol",
                                *span,
                            ));
                        }
                        if !matches!(items[2], Ast::Vector(_, _)) {
                            errors.push(AnalysisError::new(
                                "defn's parameter list must be a vector",
                                *span,
                            ));
                        }
                    }
                }
                Some("let") | Some("let*") => {
                    if items.len() < 2 {
                        errors.push(AnalysisError::new(
                            "let expects (let [bindings...] body...)",
                            *span,
                        ));
                    } else if let Ast::Vector(pairs, _) = &items[1] {
                        if pairs.len() % 2 != 0 {
                            errors.push(AnalysisError::new(
                                "let's binding vector must have an even number of forms",
                                *span,
                            ));
                        }
                    } else {
                        errors.push(AnalysisError::new(
                            "let's bindings must be a vector",
                            *span,
                        ));
                    }
                }
                Some("for") | Some("doseq") => {
                    if items.len() < 3 {
                        errors.push(AnalysisError::new(
                            "for expects (for [binding seq] body)",
                            *span,
                        ));
                    } else if let Ast::Vector(clauses, _) = &items[1] {
                        // Binding vector is a flat sequence of `pattern seq` pairs
                        // interspersed with `:let [...]`/`:when expr`/`:while expr`
                        // modifiers — each consumes exactly two slots.
                        if clauses.len() % 2 != 0 {
                            errors.push(AnalysisError::new(
                                "for's binding vector must have an even number of forms",
                                *span,
                            ));
                        } else {
                            for pair in clauses.chunks(2) {
                                if let Ast::Keyword(sym, _) = &pair[0] {
                                    if !matches!(sym.name.as_ref(), "let" | "when" | "while") {
                                        errors.push(AnalysisError::new(
                                            format!("for: unknown modifier :{}", sym.name),
                                            *span,
                                        ));
                                    }
                                }
                            }
                        }
                    } else {
                        errors.push(AnalysisError::new(
                            "for's binding form must be a vector",
                            *span,
                        ));
                    }
                }
                Some("cond") => {
                    if (items.len() - 1) % 2 != 0 {
                        errors.push(AnalysisError::new(
                            "cond expects an even number of test/expr clauses",
                            *span,
                        ));
                    }
                }
                Some("quote") => {
                    if items.len() != 2 {
                        errors.push(AnalysisError::new("quote expects exactly 1 argument", *span));
                    }
                }
                _ => {}
            }
            for item in items {
                analyze_form(item, errors);
            }
        }
        Ast::Vector(items, _) => {
            for item in items {
                analyze_form(item, errors);
            }
        }
        Ast::Set(items, _) => {
            for item in items {
                analyze_form(item, errors);
            }
        }
        Ast::Map(pairs, _) => {
            for (k, v) in pairs {
                analyze_form(k, errors);
                analyze_form(v, errors);
            }
        }
        _ => {}
    }
}

impl Ast {
    fn head_name(&self) -> Option<String> {
        match self {
            Ast::Symbol(sym, _) if sym.ns.is_none() => Some(sym.name.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    #[test]
    fn accepts_well_formed_program() {
        let forms = parse_program("(def x 1) (if true 1 2) (fn [a b] (+ a b))").unwrap();
        assert!(analyze(&forms).is_empty());
    }

    #[test]
    fn rejects_if_with_wrong_arity() {
        let forms = parse_program("(if true)").unwrap();
        assert_eq!(analyze(&forms).len(), 1);
    }

    #[test]
    fn rejects_def_without_symbol_name() {
        let forms = parse_program("(def 1 2)").unwrap();
        assert_eq!(analyze(&forms).len(), 1);
    }

    #[test]
    fn rejects_let_with_odd_bindings() {
        let forms = parse_program("(let [a 1 b] a)").unwrap();
        assert_eq!(analyze(&forms).len(), 1);
    }

    #[test]
    fn recurses_into_nested_forms() {
        let forms = parse_program("(do (if true))").unwrap();
        assert_eq!(analyze(&forms).len(), 1);
    }

    #[test]
    fn accepts_for_with_let_and_when_modifiers() {
        let forms =
            parse_program("(for [[a b] [[1 2] [3 4]] :let [s (+ a b)] :when (odd? s)] s)").unwrap();
        assert!(analyze(&forms).is_empty());
    }

    #[test]
    fn rejects_for_with_an_unknown_modifier() {
        let forms = parse_program("(for [a coll :bogus 1] a)").unwrap();
        assert_eq!(analyze(&forms).len(), 1);
    }
}
