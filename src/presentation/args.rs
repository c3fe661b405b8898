//! Sorting positional tokens into method, URLs and request items.

use crate::domain::entities::Method;
use crate::domain::errors::Result;
use crate::domain::request_item::RequestItem;
use crate::domain::value_objects::Url;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

static LOCALHOST_SHORTHAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?::\d*(?:/\S*)?|/\S*)$").expect("valid shorthand regex"));

static BARE_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:localhost|[a-zA-Z0-9-]+(?:\.[a-zA-Z0-9-]+)+)(?::\d*)?(?:/\S*)?$")
        .expect("valid host regex")
});

const METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

#[derive(Debug, Clone, PartialEq)]
pub enum Positional {
    Method(Method),
    Url(Url),
    Item(RequestItem),
    /// Neither a URL nor an item; dropped with a warning.
    Ignored(String),
}

/// Classifies one positional token. URL forms are checked before the item
/// parser so that `:8080` or `localhost:3000` never read as headers.
pub fn classify(token: &str) -> Result<Positional> {
    if METHODS.iter().any(|m| m.eq_ignore_ascii_case(token)) {
        return Ok(Positional::Method(token.parse()?));
    }
    if Url::has_scheme(token)
        || LOCALHOST_SHORTHAND.is_match(token)
        || BARE_HOST.is_match(token)
    {
        return Ok(Positional::Url(Url::normalize(token)?));
    }

    Ok(match RequestItem::parse(token)? {
        Some(item) => Positional::Item(item),
        None => Positional::Ignored(token.to_string()),
    })
}

/// Positional arguments split by kind, in command-line order.
#[derive(Debug, Default)]
pub struct Positionals {
    pub method: Option<Method>,
    pub urls: Vec<Url>,
    pub items: Vec<RequestItem>,
}

impl Positionals {
    pub fn parse<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut out = Positionals::default();
        for token in tokens {
            match classify(token)? {
                Positional::Method(method) => out.method = Some(method),
                Positional::Url(url) => out.urls.push(url),
                Positional::Item(item) => {
                    debug!(%item, operator = ?item.operator, "request item");
                    out.items.push(item);
                }
                Positional::Ignored(token) => warn!(%token, "ignoring unrecognized argument"),
            }
        }
        Ok(out)
    }
}
