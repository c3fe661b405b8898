//! Value resolution for header values, query values, body fields and raw
//! bodies.
//!
//! A value string is expanded in two passes. First, generator expressions
//! (`@uuid`, `@random_int(1-9)`) are consumed from the head of the string,
//! one after another, with leading blanks kept verbatim; the first segment
//! that is not a generator expression ends the pass and is copied as-is.
//! Then every `${name}` in the result is resolved through the [`Valuer`].

pub mod expr;
pub mod generators;
pub mod valuer;

pub use valuer::{ChainSource, EnvSource, MapSource, Valuer, VariableSource};

use crate::domain::errors::Result;
use generators::GeneratorExpr;

pub fn eval(input: &str, valuer: &Valuer) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    loop {
        let left = rest.trim_start_matches([' ', '\r', '\n']);
        out.push_str(&rest[..rest.len() - left.len()]);

        match GeneratorExpr::match_head(left).filter(|expr| valuer.is_generator(expr.name)) {
            Some(expr) => {
                out.push_str(&valuer.value(expr.name, expr.params)?);
                rest = &left[expr.len..];
            }
            None => {
                out.push_str(left);
                break;
            }
        }
    }

    expr::substitute(&out, |name, params| valuer.value(name, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valuer() -> Valuer {
        let values = HashMap::from([
            ("user".to_string(), "alice".to_string()),
            ("host".to_string(), "db1".to_string()),
        ]);
        Valuer::new(Box::new(MapSource::new(values)))
    }

    #[test]
    fn plain_text_is_unchanged_and_idempotent() {
        let valuer = valuer();
        for input in ["", "hello world", "  padded\n", r#"{"a": [1, 2]}"#, "user@example.com"] {
            let once = eval(input, &valuer).unwrap();
            assert_eq!(once, input);
            assert_eq!(eval(&once, &valuer).unwrap(), input);
        }
    }

    #[test]
    fn head_generators_expand_in_sequence() {
        let out = eval("@random(4)@random(6)", &valuer()).unwrap();
        assert_eq!(out.len(), 10);
        assert!(out.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn leading_blanks_are_preserved() {
        let out = eval(" \n@random(3) tail", &valuer()).unwrap();
        assert!(out.starts_with(" \n"));
        assert!(out.ends_with(" tail"));
        assert_eq!(out.len(), " \n".len() + 3 + " tail".len());
    }

    #[test]
    fn unknown_head_name_is_left_alone() {
        assert_eq!(eval("@user", &valuer()).unwrap(), "@user");
    }

    #[test]
    fn variables_resolve_anywhere() {
        let out = eval("postgres://${user}@${host}/app", &valuer()).unwrap();
        assert_eq!(out, "postgres://alice@db1/app");
    }

    #[test]
    fn pinned_generator_in_variable_syntax_repeats() {
        let out = eval("${random_1(12)}-${random_1(12)}", &valuer()).unwrap();
        let (a, b) = out.split_once('-').unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unresolvable_variable_is_an_error() {
        let err = eval("${missing}", &valuer()).unwrap_err();
        assert_eq!(err.to_string(), "no value for variable missing");
    }
}
