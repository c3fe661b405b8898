use crate::application::builders::BuildOptions;
use crate::application::runner::RunOptions;
use crate::domain::errors::{GurlError, Result};
use crate::domain::request_item::RequestItem;
use crate::domain::value_objects::Url;
use crate::infrastructure::http_client::TransportOptions;
use crate::infrastructure::output::OutputSettings;
use std::collections::HashMap;
use std::time::Duration;

/// Prefix of environment variables that supply `${NAME}` values.
pub const VAR_ENV_PREFIX: &str = "GURL_VAR_";

/// Everything one invocation needs, fixed before the first request.
#[derive(Debug, Clone)]
pub struct Config {
    pub urls: Vec<Url>,
    pub items: Vec<RequestItem>,
    /// `--var NAME=VALUE` values.
    pub vars: HashMap<String, String>,
    /// Ask on the terminal for variables nothing else supplies.
    pub prompt: bool,
    pub transport: TransportOptions,
    pub build: BuildOptions,
    pub run: RunOptions,
    pub output: OutputSettings,
}

impl Config {
    /// Rejects combinations no run can satisfy.
    pub fn validate(self) -> Result<Self> {
        if self.urls.is_empty() {
            return Err(GurlError::parse("no URL given"));
        }
        if self.run.concurrency == 0 {
            return Err(GurlError::parse("concurrency must be at least 1"));
        }
        if self.run.requests == Some(0) {
            return Err(GurlError::parse("number of requests must be at least 1"));
        }
        Ok(self)
    }
}

/// Timeout used by the transport and for body reads; `None` when disabled.
pub fn timeout_limit(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

/// Parses `NAME=VALUE` pairs; later pairs override earlier ones.
pub fn parse_vars<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    for pair in pairs {
        let Some((name, value)) = pair.split_once('=') else {
            return Err(GurlError::parse(format!(
                "invalid variable {pair:?}, expected NAME=VALUE"
            )));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(GurlError::parse(format!("invalid variable {pair:?}: empty name")));
        }
        vars.insert(name.to_string(), value.to_string());
    }
    Ok(vars)
}
