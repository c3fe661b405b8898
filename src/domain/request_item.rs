//! Request items: the `key=value`, `key==value`, `key:=json`, `key:value`,
//! `key@file` and `@file` tokens that follow the URL on the command line.

use crate::domain::errors::{GurlError, Result};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static ITEM: LazyLock<Regex> = LazyLock::new(|| {
    // Key characters never include an operator character, so the first
    // operator after the key decides; `==` and `:=` win over `=` and `:`.
    Regex::new(r"(?s)^([\w.\-]*)(==|:=|=|:|@)(.*)$").expect("valid item regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// A `=` item routed to the URL query (GET or form mode).
    Query,
    /// `key==value`: always a query-string parameter.
    ForceQuery,
    /// `key:=json`: raw JSON literal, or `@file` holding JSON.
    JsonField,
    /// `key:value`
    Header,
    /// `key=value`: JSON field or form field depending on the mode.
    Param,
    /// `key@path`: multipart file part.
    FileUpload,
    /// `@path`: request body read from a file.
    RawBody,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Query | Operator::Param => "=",
            Operator::ForceQuery => "==",
            Operator::JsonField => ":=",
            Operator::Header => ":",
            Operator::FileUpload | Operator::RawBody => "@",
        }
    }
}

/// One classified command-line token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestItem {
    pub key: String,
    pub operator: Operator,
    pub raw_value: String,
}

impl RequestItem {
    /// Classifies one token.
    ///
    /// Returns `Ok(None)` when the token has no operator at all, so the
    /// caller can treat it as a plain positional argument. An operator with
    /// an empty key is only valid for `@`; anything else is rejected.
    pub fn parse(token: &str) -> Result<Option<RequestItem>> {
        let Some(caps) = ITEM.captures(token) else {
            return Ok(None);
        };

        let key = &caps[1];
        let operator = match &caps[2] {
            ":=" => Operator::JsonField,
            "==" => Operator::ForceQuery,
            "=" => Operator::Param,
            ":" => Operator::Header,
            _ if key.is_empty() => Operator::RawBody,
            _ => Operator::FileUpload,
        };

        if key.is_empty() && operator != Operator::RawBody {
            return Err(GurlError::parse(format!("unsupported argument: {token}")));
        }

        Ok(Some(RequestItem {
            key: key.to_string(),
            operator,
            raw_value: caps[3].to_string(),
        }))
    }

    /// Resolves a `=` item against the request mode: it lands in the query
    /// string for GET requests and in form mode, and stays a body field
    /// otherwise.
    pub fn routed(&self, as_query: bool) -> Operator {
        match self.operator {
            Operator::Param if as_query => Operator::Query,
            other => other,
        }
    }

    /// Whether this item alone would turn an implicit GET into a POST.
    pub fn carries_data(&self) -> bool {
        matches!(
            self.operator,
            Operator::JsonField | Operator::Param | Operator::FileUpload
        )
    }
}

impl fmt::Display for RequestItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.key, self.operator.symbol(), self.raw_value)
    }
}
