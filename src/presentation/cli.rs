use crate::application::body::read_head;
use crate::application::builders::{BuildOptions, RequestBuilder};
use crate::application::eval::{ChainSource, EnvSource, MapSource, Valuer, VariableSource};
use crate::application::runner::{RequestRunner, RunOptions, RunSummary};
use crate::application::services::HttpRequestService;
use crate::domain::entities::Method;
use crate::domain::errors::GurlError;
use crate::domain::value_objects::{ThinkTime, Url, parse_byte_size, parse_duration};
use crate::infrastructure::config::{Config, VAR_ENV_PREFIX, parse_vars, timeout_limit};
use crate::infrastructure::connector::{Proxy, ProxyRules, TlsOptions};
use crate::infrastructure::download::Downloader;
use crate::infrastructure::http_client::{HyperHttpClient, TransportOptions};
use crate::infrastructure::output::{ConsoleHandler, OutputSettings, PrintOptions};
use crate::infrastructure::prompt::TerminalPrompt;
use crate::presentation::args::Positionals;
use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use colored::Colorize;
use crossterm::tty::IsTty;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::debug;

/// How long piped input may stay silent before a hint is logged.
const STDIN_GRACE: Duration = Duration::from_secs(3);

/// CLI configuration for gurl
#[derive(Parser, Debug)]
#[command(name = "gurl", version)]
#[command(
    about = "gurl: HTTP requests from the command line, with templated values and body replay",
    long_about = None
)]
pub struct Cli {
    /// [METHOD] URL [URL...] [ITEM...]: items are key=value, key==value,
    /// key:=json, key:value, key@file and @file
    #[arg(value_name = "ARGS")]
    pub args: Vec<String>,

    #[arg(short, long)]
    pub method: Option<Method>,

    /// Target URL, in addition to positional URLs
    #[arg(short = 'u', long = "url", env = "GURL_URL")]
    pub urls: Vec<String>,

    /// Send form fields (urlencoded or multipart) instead of JSON
    #[arg(short, long)]
    pub form: bool,

    /// Upload a file as the multipart field `file`
    #[arg(short = 'F', long = "file", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// Raw body: text, @file, or @file:line to send one request per line
    #[arg(short, long)]
    pub body: Option<String>,

    /// Number of requests to send
    #[arg(short = 'n', long)]
    pub requests: Option<u64>,

    /// Number of concurrent workers
    #[arg(short, long, default_value_t = 1)]
    pub concurrency: usize,

    /// Pause between requests, e.g. 5s, 100ms-5s or 100-200ms
    #[arg(long)]
    pub think: Option<ThinkTime>,

    /// Connect, response and body read timeout; 0 disables it
    #[arg(short, long, default_value = "1m", value_parser = parse_duration)]
    pub timeout: Duration,

    /// HTTP proxy as [http://][USER:PASS@]HOST:PORT; defaults to
    /// HTTP_PROXY / HTTPS_PROXY unless NO_PROXY matches
    #[arg(short = 'P', long, env = "GURL_PROXY")]
    pub proxy: Option<String>,

    /// Allow connections to TLS sites without valid certificates
    #[arg(short, long)]
    pub insecure: bool,

    /// Extra CA certificate (PEM) to trust
    #[arg(long = "ca", value_name = "PATH")]
    pub ca_file: Option<PathBuf>,

    /// Open a new connection for every request
    #[arg(short = 'k', long)]
    pub no_keepalive: bool,

    /// Upload and download rate limit per second, e.g. 10K or 1M
    #[arg(short = 'L', long, value_name = "SIZE", value_parser = parse_byte_size)]
    pub limit_rate: Option<u64>,

    /// Never read the request body from standard input
    #[arg(short = 'I', long)]
    pub ignore_stdin: bool,

    /// What to print: A all, H request headers, B request body,
    /// h response headers, b response body, s connection info
    #[arg(short, long)]
    pub print: Option<PrintOptions>,

    /// Print JSON responses as received
    #[arg(short, long)]
    pub raw: bool,

    /// Save the response body to a file
    #[arg(short, long)]
    pub download: bool,

    /// Basic authorization as USER[:PASS]
    #[arg(long, env = "GURL_AUTH")]
    pub auth: Option<String>,

    /// Fixed value for ${NAME}
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// Forget pinned variable values before every request
    #[arg(long)]
    pub repin: bool,

    /// Never ask for variable values on the terminal
    #[arg(long, env = "GURL_NO_PROMPT")]
    pub no_prompt: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Builds the run configuration from the flags and positional arguments.
    /// `stdin` holds the first bytes of piped input, if any arrived.
    pub fn config(&self, stdin: Option<Bytes>, stdout_tty: bool) -> Result<Config> {
        let positionals = Positionals::parse(self.args.iter().map(String::as_str))?;

        let mut urls = self
            .urls
            .iter()
            .map(|url| Url::normalize(url))
            .collect::<Result<Vec<_>, _>>()?;
        urls.extend(positionals.urls);

        let proxies = match &self.proxy {
            Some(raw) => ProxyRules::all(Proxy::parse(raw)?),
            None => ProxyRules::from_env()?,
        };

        let config = Config {
            urls,
            items: positionals.items,
            vars: parse_vars(self.vars.iter().map(String::as_str))?,
            prompt: !self.no_prompt,
            transport: TransportOptions {
                timeout: self.timeout,
                tls: TlsOptions {
                    insecure: self.insecure,
                    ca_file: self.ca_file.clone(),
                },
                proxies,
                keepalive: !self.no_keepalive,
                rate_limit: self.limit_rate.filter(|rate| *rate > 0),
            },
            build: BuildOptions {
                method: self.method.or(positionals.method),
                form: self.form,
                uploads: self.files.clone(),
                body: self.body.clone(),
                stdin,
                auth: self.auth.clone(),
            },
            run: RunOptions {
                requests: self.requests,
                concurrency: self.concurrency,
                think: self.think.unwrap_or(ThinkTime::fixed(Duration::ZERO)),
                repin: self.repin,
            },
            output: OutputSettings {
                print: self
                    .print
                    .unwrap_or_else(|| PrintOptions::for_terminal(stdout_tty)),
                pretty: !self.raw,
                download: self.download,
                body_timeout: timeout_limit(self.timeout),
            },
        };
        Ok(config.validate()?)
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let stdin = if self.ignore_stdin || std::io::stdin().is_tty() {
            None
        } else {
            piped_input(&mut tokio::io::stdin()).await?
        };
        let stdout_tty = std::io::stdout().is_tty();
        if !stdout_tty {
            colored::control::set_override(false);
        }

        let config = self.config(stdin, stdout_tty)?;
        debug!(?config, "configuration loaded");

        let prepared = RequestBuilder::new(config.build.clone())
            .items(config.items.clone())
            .build()?;

        let valuer = Arc::new(valuer(&config));

        let http_client = HyperHttpClient::new(&config.transport)?;
        let request_service = Arc::new(HttpRequestService::new(Box::new(http_client)));
        let downloader = Downloader::new(".").with_progress(std::io::stderr().is_tty());
        let handler = Arc::new(ConsoleHandler::new(config.output.clone(), downloader));

        let runner = RequestRunner::new(request_service, valuer, handler, config.run.clone());
        let summary = runner.run(config.urls, prepared).await?;
        debug!(requests = runner.counter().issued(), "correlation numbers issued");

        if summary.iterations > 1 {
            eprintln!("{}", summary.to_string().cyan());
        }
        Ok(summary)
    }
}

/// `--var` values first, then `GURL_VAR_*`, then the terminal prompt.
fn valuer(config: &Config) -> Valuer {
    let mut sources: Vec<Box<dyn VariableSource>> = vec![
        Box::new(MapSource::new(config.vars.clone())),
        Box::new(EnvSource::new(VAR_ENV_PREFIX)),
    ];
    if config.prompt {
        sources.push(Box::new(TerminalPrompt::new()));
    }
    Valuer::new(Box::new(ChainSource::new(sources)))
}

/// First bytes of piped input; `None` when it ends without data, so an
/// empty or redirected-from-nothing stdin leaves the request untouched.
async fn piped_input<R>(reader: &mut R) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let head = read_head(reader, STDIN_GRACE)
        .await
        .map_err(|e| GurlError::resource("<stdin>", e))?;
    Ok((!head.is_empty()).then_some(head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::GurlError;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("gurl").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let cli = parse(&[":8080"]);
        let config = cli.config(None, true).unwrap();
        assert_eq!(config.urls[0].as_str(), "http://localhost:8080/");
        assert_eq!(config.transport.timeout, Duration::from_secs(60));
        assert!(config.transport.keepalive);
        assert_eq!(config.transport.tls, TlsOptions::default());
        assert_eq!(config.transport.rate_limit, None);
        assert_eq!(config.run, RunOptions::default());
        assert_eq!(config.output.print, PrintOptions::all());
        assert!(config.output.pretty);
        assert!(config.prompt);
        assert_eq!(config.build, BuildOptions::default());
    }

    #[test]
    fn piped_stdout_prints_only_the_body() {
        let config = parse(&[":8080"]).config(None, false).unwrap();
        assert_eq!(config.output.print, PrintOptions::body_only());
    }

    #[test]
    fn flags_fill_every_section() {
        let cli = parse(&[
            "-f", "-F", "a.bin", "-b", "@lines.json:line", "-n", "5", "-c", "2",
            "--think", "100-200ms", "-t", "0", "-p", "hb", "-r", "-d",
            "--auth", "ann:secret", "--var", "id=7", "--repin", "--no-prompt",
            "-u", "example.com", "put", ":9000/x", "name=ann",
        ]);
        let config = cli.config(Some(Bytes::from_static(b"{}")), true).unwrap();

        let urls: Vec<String> = config.urls.iter().map(Url::as_str).collect();
        assert_eq!(urls, ["http://example.com/", "http://localhost:9000/x"]);
        assert_eq!(config.items.len(), 1);
        assert_eq!(config.vars["id"], "7");
        assert!(!config.prompt);

        assert_eq!(config.build.method, Some(Method::Put));
        assert!(config.build.form && config.build.stdin.is_some());
        assert_eq!(config.build.uploads, [PathBuf::from("a.bin")]);
        assert_eq!(config.build.body.as_deref(), Some("@lines.json:line"));
        assert_eq!(config.build.auth.as_deref(), Some("ann:secret"));

        assert_eq!(config.run.requests, Some(5));
        assert_eq!(config.run.concurrency, 2);
        assert_eq!(config.run.think, "100-200ms".parse::<ThinkTime>().unwrap());
        assert!(config.run.repin);

        assert_eq!(config.output.print, "hb".parse::<PrintOptions>().unwrap());
        assert!(!config.output.pretty && config.output.download);
        assert_eq!(config.output.body_timeout, None);
    }

    #[test]
    fn transport_flags() {
        let cli = parse(&[
            "-P", "http://ann:pw@proxy.local:3128", "-i", "--ca", "root.pem", "-k",
            "-L", "10K", "https://example.com",
        ]);
        let config = cli.config(None, true).unwrap();
        let expected = ProxyRules::all(Proxy::parse("http://ann:pw@proxy.local:3128").unwrap());
        assert_eq!(config.transport.proxies, expected);
        assert!(config.transport.tls.insecure);
        assert_eq!(config.transport.tls.ca_file, Some(PathBuf::from("root.pem")));
        assert!(!config.transport.keepalive);
        assert_eq!(config.transport.rate_limit, Some(10 * 1024));

        let unlimited = parse(&["-L", "0", ":8080"]).config(None, true).unwrap();
        assert_eq!(unlimited.transport.rate_limit, None);
    }

    #[test]
    fn bad_rate_and_proxy_are_rejected() {
        assert!(Cli::try_parse_from(["gurl", "-L", "fast", ":8080"]).is_err());
        assert!(parse(&["-P", "https://proxy.local", ":8080"]).config(None, true).is_err());
    }

    #[test]
    fn flag_variables_resolve_without_prompting() {
        let config = parse(&["--no-prompt", "--var", "team=core", ":8080"])
            .config(None, true)
            .unwrap();
        let valuer = valuer(&config);
        assert_eq!(valuer.value("team", None).unwrap(), "core");
        assert!(valuer.value("gurl_unset_in_tests", None).is_err());
    }

    #[tokio::test]
    async fn empty_stdin_is_not_request_data() {
        let mut empty: &[u8] = b"";
        assert_eq!(piped_input(&mut empty).await.unwrap(), None);

        let config = parse(&[":8080/x"]).config(None, true).unwrap();
        let prepared = RequestBuilder::new(config.build).build().unwrap();
        assert_eq!(prepared.template.method, Method::Get);
    }

    #[tokio::test]
    async fn binary_stdin_is_kept_as_bytes() {
        let mut binary: &[u8] = &[0xff, 0xfe, 0x00, 0x01];
        let head = piped_input(&mut binary).await.unwrap();
        assert_eq!(head.as_deref(), Some(&[0xff, 0xfe, 0x00, 0x01][..]));

        let config = parse(&[":8080/up"]).config(head, true).unwrap();
        let prepared = RequestBuilder::new(config.build).build().unwrap();
        assert_eq!(prepared.template.method, Method::Post);
        assert!(prepared.body.is_replay());
    }

    #[test]
    fn explicit_method_flag_wins() {
        let config = parse(&["-m", "delete", "get", ":8080"]).config(None, true).unwrap();
        assert_eq!(config.build.method, Some(Method::Delete));
    }

    #[test]
    fn bad_print_letters_are_rejected_at_parse_time() {
        assert!(Cli::try_parse_from(["gurl", "-p", "Hz", ":8080"]).is_err());
    }

    #[test]
    fn missing_url_is_an_error() {
        let err = parse(&["a=1"]).config(None, true).unwrap_err();
        assert!(matches!(err.downcast_ref::<GurlError>(), Some(GurlError::Parse(_))));
    }
}
