//! `${name}` / `${name(params)}` variable substitution.

use crate::domain::errors::Result;
use regex::Regex;
use std::sync::LazyLock;

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)(?:\((.*)\))?$").expect("valid variable regex")
});

/// Replaces every well-formed `${...}` with the value `resolve` returns for
/// it. Malformed or unterminated expressions are copied through unchanged.
pub fn substitute<F>(input: &str, mut resolve: F) -> Result<String>
where
    F: FnMut(&str, Option<&str>) -> Result<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };

        let inner = &after[..end];
        match VARIABLE.captures(inner) {
            Some(caps) => {
                let name = caps.get(1).map_or("", |m| m.as_str());
                let params = caps.get(2).map(|m| m.as_str());
                out.push_str(&resolve(name, params)?);
            }
            None => {
                out.push_str("${");
                out.push_str(inner);
                out.push('}');
            }
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper(name: &str, params: Option<&str>) -> Result<String> {
        Ok(match params {
            Some(p) => format!("{}[{}]", name.to_uppercase(), p),
            None => name.to_uppercase(),
        })
    }

    #[test]
    fn replaces_each_variable() {
        let out = substitute("id=${id}&n=${count_1}", upper).unwrap();
        assert_eq!(out, "id=ID&n=COUNT_1");
    }

    #[test]
    fn passes_params() {
        let out = substitute(r#"{"n":${random_int(1-5)}}"#, upper).unwrap();
        assert_eq!(out, r#"{"n":RANDOM_INT[1-5]}"#);
    }

    #[test]
    fn text_without_variables_is_unchanged() {
        let input = r#"{"price": "$5", "tpl": "{x}"}"#;
        assert_eq!(substitute(input, upper).unwrap(), input);
    }

    #[test]
    fn malformed_expressions_are_copied() {
        assert_eq!(substitute("${not valid}", upper).unwrap(), "${not valid}");
        assert_eq!(substitute("${}", upper).unwrap(), "${}");
        assert_eq!(substitute("tail ${open", upper).unwrap(), "tail ${open");
    }

    #[test]
    fn resolver_errors_propagate() {
        let err = substitute("${a}", |_, _| {
            Err(crate::domain::errors::GurlError::InteractiveAbort)
        })
        .unwrap_err();
        assert!(err.is_abort());
    }
}
