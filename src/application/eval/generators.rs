//! Built-in value generators and the `@name(params)` head expression.

use rand::Rng;
use rand::distr::Alphanumeric;
use regex::Regex;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@([A-Za-z_][A-Za-z0-9_]*)(?:\(([^)]*)\))?").expect("valid generator regex")
});

const NAMES: &[&str] = &[
    "random",
    "random_int",
    "random_bool",
    "random_pick",
    "uuid",
    "timestamp",
    "timestamp_ms",
    "seq",
];

/// A generator expression found at the start of a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorExpr<'a> {
    pub name: &'a str,
    pub params: Option<&'a str>,
    /// Bytes of input the expression spans.
    pub len: usize,
}

impl<'a> GeneratorExpr<'a> {
    pub fn match_head(input: &'a str) -> Option<Self> {
        let caps = HEAD.captures(input)?;
        let whole = caps.get(0)?;
        Some(GeneratorExpr {
            name: caps.get(1)?.as_str(),
            params: caps.get(2).map(|m| m.as_str()),
            len: whole.end(),
        })
    }
}

/// The default generator registry, keyed by pure (suffix-free) name.
#[derive(Debug, Default)]
pub struct GeneratorRegistry {
    seq: AtomicU64,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        NAMES.contains(&name)
    }

    /// Produces a value, or `None` when the name is unknown or the
    /// parameters make no sense for it.
    pub fn generate(&self, name: &str, params: Option<&str>) -> Option<String> {
        let params = params.map(str::trim).filter(|p| !p.is_empty());
        match name {
            "random" => {
                let len = match params {
                    Some(p) => p.parse().ok()?,
                    None => 16,
                };
                Some(
                    rand::rng()
                        .sample_iter(&Alphanumeric)
                        .take(len)
                        .map(char::from)
                        .collect(),
                )
            }
            "random_int" => {
                let (min, max) = int_range(params.unwrap_or("0-1000"))?;
                Some(rand::rng().random_range(min..=max).to_string())
            }
            "random_bool" => Some(rand::rng().random_bool(0.5).to_string()),
            "random_pick" => {
                let choices: Vec<&str> = params?.split(',').map(str::trim).collect();
                let pick = rand::rng().random_range(0..choices.len());
                Some(choices[pick].to_string())
            }
            "uuid" => Some(uuid_v4()),
            "timestamp" => Some(since_epoch().as_secs().to_string()),
            "timestamp_ms" => Some(since_epoch().as_millis().to_string()),
            "seq" => Some((self.seq.fetch_add(1, Ordering::Relaxed) + 1).to_string()),
            _ => None,
        }
    }
}

fn int_range(range: &str) -> Option<(i64, i64)> {
    let (min, max) = match range.split_once('-') {
        Some((min, max)) => (min.trim().parse().ok()?, max.trim().parse().ok()?),
        None => (0, range.trim().parse().ok()?),
    };
    (min <= max).then_some((min, max))
}

fn since_epoch() -> std::time::Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

fn uuid_v4() -> String {
    let mut b: [u8; 16] = rand::rng().random();
    b[6] = (b[6] & 0x0f) | 0x40;
    b[8] = (b[8] & 0x3f) | 0x80;
    let hex: String = b.iter().map(|byte| format!("{byte:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
