use crate::domain::errors::{GurlError, Result};
use hyper::http::Uri;
use rand::Rng;
use regex::Regex;
use serde_json::Value;
use serde_json::value::RawValue;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

static SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+\-.]*://").expect("valid scheme regex"));

/// Represents a validated URL
#[derive(Debug, Clone, PartialEq)]
pub struct Url(pub Uri);

impl Url {
    /// Creates a new Url with validation
    ///
    /// # Arguments
    /// * `url` - The URL string to parse
    ///
    /// # Returns
    /// * `Ok(Url)` - Validated URL
    /// * `Err(GurlError::Parse)` - If the URL is invalid
    pub fn new(url: &str) -> Result<Self> {
        let uri = url
            .parse::<Uri>()
            .map_err(|e| GurlError::parse(format!("invalid URL {url:?}: {e}")))?;
        Ok(Url(uri))
    }

    /// Creates a Url from the loose forms accepted on the command line.
    ///
    /// `:8080/x` and `/x` target localhost, a missing scheme defaults to
    /// `http://`, an empty path becomes `/` and a dangling `:` after the
    /// host is dropped.
    pub fn normalize(raw: &str) -> Result<Self> {
        let mut uri = if raw == ":" {
            "localhost".to_string()
        } else if raw.starts_with(':') || raw.starts_with('/') {
            format!("localhost{raw}")
        } else {
            raw.to_string()
        };

        if !Self::has_scheme(&uri) {
            uri = format!("http://{uri}");
        }

        let Some((scheme, rest)) = uri.split_once("://") else {
            return Err(GurlError::parse(format!("invalid URL {raw:?}")));
        };
        let split = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(split);
        let authority = authority.trim_end_matches(':');
        if authority.is_empty() {
            return Err(GurlError::parse(format!("invalid URL {raw:?}: missing host")));
        }

        let tail = if tail.starts_with('/') {
            tail.to_string()
        } else {
            format!("/{tail}")
        };

        Self::new(&format!("{scheme}://{authority}{tail}"))
    }

    /// Whether `raw` starts with an explicit `scheme://`.
    pub fn has_scheme(raw: &str) -> bool {
        SCHEME.is_match(raw)
    }

    /// Splits `user:pass@` out of the authority.
    pub fn split_credentials(self) -> Result<(Url, Option<String>)> {
        let Some(authority) = self.0.authority() else {
            return Ok((self, None));
        };
        let Some((userinfo, host)) = authority.as_str().rsplit_once('@') else {
            return Ok((self, None));
        };

        let userinfo = userinfo.to_string();
        let scheme = self.0.scheme_str().unwrap_or("http");
        let path = self
            .0
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = Url::new(&format!("{scheme}://{host}{path}"))?;
        Ok((url, Some(userinfo)))
    }

    /// Appends an already-encoded query string, using `&` when the URL
    /// already carries a query and `?` otherwise.
    pub fn with_query(&self, query: &str) -> Result<Url> {
        if query.is_empty() {
            return Ok(self.clone());
        }

        let current = self.as_str();
        let separator = if current.contains('?') { '&' } else { '?' };
        Url::new(&format!("{current}{separator}{query}"))
    }

    /// Returns the URL as a string
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }

    pub fn scheme(&self) -> &str {
        self.0.scheme_str().unwrap_or("http")
    }

    /// Last non-empty path segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.0.path().rsplit('/').find(|segment| !segment.is_empty())
    }
}

/// Represents a validated JSON body
///
/// The text is kept exactly as given, so numbers keep their digits and
/// formatting instead of going through a float round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonBody(pub String);

impl JsonBody {
    /// Creates a new JsonBody with validation
    ///
    /// # Arguments
    /// * `json` - The JSON string to validate
    ///
    /// # Returns
    /// * `Ok(JsonBody)` - Validated JSON, surrounding whitespace removed
    /// * `Err(GurlError::Parse)` - If the JSON is invalid
    pub fn new(json: &str) -> Result<Self> {
        let raw = serde_json::from_str::<&RawValue>(json)
            .map_err(|e| GurlError::parse(format!("invalid JSON: {e}")))?;
        Ok(JsonBody(raw.get().to_string()))
    }

    /// A JSON string holding `text`.
    pub fn string(text: &str) -> Self {
        JsonBody(Value::String(text.to_string()).to_string())
    }

    /// Writes ordered fields as one compact JSON object, embedding every
    /// value verbatim.
    pub fn from_fields<'a>(fields: impl IntoIterator<Item = (&'a str, &'a JsonBody)>) -> Self {
        let mut out = String::from("{");
        for (i, (key, value)) in fields.into_iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&Value::String(key.to_string()).to_string());
            out.push(':');
            out.push_str(&value.0);
        }
        out.push('}');
        JsonBody(out)
    }
}

/// Ordered `key=value` pairs. Setting an existing key replaces its value
/// in place, so the first occurrence keeps its position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamList(Vec<(String, String)>);

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Escapes key and value independently and joins pairs with `&`.
    pub fn to_query_string(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| {
                format!(
                    "{}={}",
                    form_urlencoded::byte_serialize(k.as_bytes()).collect::<String>(),
                    form_urlencoded::byte_serialize(v.as_bytes()).collect::<String>()
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl FromIterator<(String, String)> for ParamList {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut list = ParamList::new();
        for (k, v) in iter {
            list.set(k, v);
        }
        list
    }
}

/// Delay inserted between successive requests: a fixed duration or a
/// uniformly sampled range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkTime {
    min: Duration,
    max: Duration,
}

impl ThinkTime {
    pub fn fixed(duration: Duration) -> Self {
        Self {
            min: duration,
            max: duration,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.max.is_zero()
    }

    pub fn sample(&self) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        rand::rng().random_range(self.min..=self.max)
    }
}

impl FromStr for ThinkTime {
    type Err = GurlError;

    /// Accepts `5s`, `100ms`, `100ms-5s` and `100-200ms`; a unitless lower
    /// bound borrows the unit of the upper bound.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some((lower, upper)) = s.split_once('-') else {
            return Ok(Self::fixed(parse_duration(s)?));
        };

        let max = parse_duration(upper)?;
        let lower = if !lower.is_empty() && lower.chars().all(|c| c.is_ascii_digit() || c == '.') {
            let unit_start = upper
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .unwrap_or(upper.len());
            format!("{lower}{}", &upper[unit_start..])
        } else {
            lower.to_string()
        };
        let min = parse_duration(&lower)?;

        if min > max {
            return Err(GurlError::parse(format!("invalid think time {s:?}: lower bound exceeds upper bound")));
        }
        Ok(Self { min, max })
    }
}

/// Parses durations such as `1m`, `250ms`, `1.5s`. A bare `0` is zero.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let unit_start = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(unit_start);
    let number: f64 = number
        .parse()
        .map_err(|_| GurlError::parse(format!("invalid duration {s:?}")))?;

    let seconds = match unit {
        "ns" => number / 1e9,
        "us" | "µs" => number / 1e6,
        "ms" => number / 1e3,
        "s" => number,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        _ => return Err(GurlError::parse(format!("invalid duration {s:?}: unknown unit {unit:?}"))),
    };
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| GurlError::parse(format!("invalid duration {s:?}: {e}")))
}

/// Parses sizes such as `512`, `10K`, `1.5MB` or `2GiB`; units are
/// powers of 1024.
pub fn parse_byte_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let invalid = || GurlError::parse(format!("invalid size {s:?}"));
    let unit_start = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(unit_start);
    let number: f64 = number.parse().map_err(|_| invalid())?;

    let unit = unit.trim().to_ascii_uppercase();
    let unit = unit
        .strip_suffix("IB")
        .or_else(|| unit.strip_suffix('B'))
        .unwrap_or(unit.as_str());
    let scale: f64 = match unit {
        "" => 1.0,
        "K" => 1024.0,
        "M" => 1024.0 * 1024.0,
        "G" => 1024.0 * 1024.0 * 1024.0,
        _ => return Err(invalid()),
    };
    let bytes = number * scale;
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as u64)
}
