use crate::application::services::HttpClient;
use crate::domain::entities::{
    ConnectionInfo, Method as DomainMethod, Request, RequestBody, Response, ResponseBody,
};
use crate::domain::errors::{GurlError, Result};
use crate::infrastructure::config::timeout_limit;
use crate::infrastructure::connector::{GurlConnector, ProxyRules, TlsOptions};
use crate::infrastructure::throttle::throttle;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::{GzDecoder, ZlibDecoder};
use futures::{StreamExt, TryStreamExt};
use http_body_util::{BodyExt, BodyStream, StreamBody};
use hyper::body::{Body, Frame, Incoming};
use hyper::header::{CONTENT_ENCODING, HeaderMap, HeaderValue, PROXY_AUTHORIZATION};
use hyper::{Method, Request as HyperRequest};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::error::Error as StdError;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How requests reach their targets.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportOptions {
    /// Connect and response-head timeout; zero disables both.
    pub timeout: Duration,
    pub tls: TlsOptions,
    pub proxies: ProxyRules,
    /// Reuse connections across requests.
    pub keepalive: bool,
    /// Upload and download limit in bytes per second.
    pub rate_limit: Option<u64>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            tls: TlsOptions::default(),
            proxies: ProxyRules::none(),
            keepalive: true,
            rate_limit: None,
        }
    }
}

/// Infrastructure implementation of HttpClient using Hyper
/// This is a low-level HTTP transport that the application service uses
pub struct HyperHttpClient {
    client: Client<GurlConnector, RequestBody>,
    proxies: Arc<ProxyRules>,
    timeout: Option<Duration>,
    rate_limit: Option<u64>,
}

impl HyperHttpClient {
    pub fn new(options: &TransportOptions) -> Result<Self> {
        let timeout = timeout_limit(options.timeout);
        let proxies = Arc::new(options.proxies.clone());
        let connector = GurlConnector::new(options.tls.connector()?, proxies.clone(), timeout);

        let mut builder = Client::builder(TokioExecutor::new());
        if !options.keepalive {
            builder.pool_max_idle_per_host(0);
        }
        Ok(Self {
            client: builder.build(connector),
            proxies,
            timeout,
            rate_limit: options.rate_limit,
        })
    }

    async fn execute_http_request(
        &self,
        url: &str,
        request: HyperRequest<RequestBody>,
    ) -> Result<hyper::Response<Incoming>> {
        let pending = self.client.request(request);
        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| GurlError::transport(url, format!("no response within {limit:?}")))?,
            None => pending.await,
        };
        response.map_err(|e| GurlError::transport(url, error_chain(&e)))
    }
}

#[async_trait]
impl HttpClient for HyperHttpClient {
    async fn send(&self, mut request: Request) -> Result<Response> {
        let url = request.url.as_str();

        // Plain http goes to the proxy as is; https tunnels authenticate on CONNECT.
        if request.url.scheme() == "http" {
            if let Some(authorization) = self
                .proxies
                .for_uri(&request.url.0)
                .and_then(|proxy| proxy.authorization())
            {
                let value = HeaderValue::from_str(authorization)
                    .map_err(|e| GurlError::transport(&url, e))?;
                request.headers.insert(PROXY_AUTHORIZATION, value);
            }
        }
        if let Some(rate) = self.rate_limit {
            request.body = throttle(request.body, rate);
        }

        let hyper_request = RequestAdapter::to_hyper_request(request)
            .map_err(|e| GurlError::transport(&url, e))?;
        let hyper_response = self.execute_http_request(&url, hyper_request).await?;
        debug!(url = %url, status = %hyper_response.status(), "response head received");

        let mut response = ResponseAdapter::to_domain_response(hyper_response)?;
        if let Some(rate) = self.rate_limit {
            response.body = throttle(response.body, rate);
        }
        Ok(response)
    }
}

/// Adapter for converting domain requests to Hyper requests
struct RequestAdapter;

impl RequestAdapter {
    fn to_hyper_request(domain_request: Request) -> http::Result<HyperRequest<RequestBody>> {
        let builder = HyperRequest::builder()
            .method(MethodAdapter::to_hyper_method(domain_request.method))
            .uri(domain_request.url.0);
        Self::apply_headers(builder, domain_request.headers).body(domain_request.body)
    }

    fn apply_headers(
        mut builder: http::request::Builder,
        headers: HeaderMap,
    ) -> http::request::Builder {
        if let Some(target) = builder.headers_mut() {
            target.extend(headers);
        }
        builder
    }
}

/// Adapter for converting domain responses from Hyper responses
struct ResponseAdapter;

impl ResponseAdapter {
    fn to_domain_response(hyper_response: hyper::Response<Incoming>) -> Result<Response> {
        let connection = hyper_response.extensions().get::<ConnectionInfo>().copied();
        let (parts, body) = hyper_response.into_parts();
        let body = BodyAdapter::to_domain_body(&parts.headers, body);

        Ok(Response {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            connection,
            body,
        })
    }
}

/// Adapter for converting domain HTTP methods to Hyper methods
struct MethodAdapter;

impl MethodAdapter {
    fn to_hyper_method(domain_method: DomainMethod) -> Method {
        match domain_method {
            DomainMethod::Get => Method::GET,
            DomainMethod::Post => Method::POST,
            DomainMethod::Put => Method::PUT,
            DomainMethod::Delete => Method::DELETE,
            DomainMethod::Patch => Method::PATCH,
            DomainMethod::Head => Method::HEAD,
            DomainMethod::Options => Method::OPTIONS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Gzip,
    Deflate,
}

/// Adapter for turning response bodies into plain byte streams
struct BodyAdapter;

impl BodyAdapter {
    fn to_domain_body<B>(headers: &HeaderMap, body: B) -> ResponseBody
    where
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: StdError + Send + Sync + 'static,
    {
        let encoding = headers
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_ascii_lowercase());

        match encoding.as_deref() {
            Some("gzip" | "x-gzip") => decode_body(body, Encoding::Gzip),
            Some("deflate") => decode_body(body, Encoding::Deflate),
            _ => body.map_err(io::Error::other).boxed_unsync(),
        }
    }
}

enum Decoder {
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(ZlibDecoder<Vec<u8>>),
}

impl Decoder {
    fn new(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Gzip => Decoder::Gzip(GzDecoder::new(Vec::new())),
            Encoding::Deflate => Decoder::Deflate(ZlibDecoder::new(Vec::new())),
        }
    }

    /// Feeds compressed bytes and returns whatever decompressed so far.
    fn write(&mut self, chunk: &[u8]) -> io::Result<Bytes> {
        let out = match self {
            Decoder::Gzip(d) => {
                d.write_all(chunk)?;
                std::mem::take(d.get_mut())
            }
            Decoder::Deflate(d) => {
                d.write_all(chunk)?;
                std::mem::take(d.get_mut())
            }
        };
        Ok(Bytes::from(out))
    }

    fn finish(self) -> io::Result<Bytes> {
        let out = match self {
            Decoder::Gzip(d) => d.finish()?,
            Decoder::Deflate(d) => d.finish()?,
        };
        Ok(Bytes::from(out))
    }
}

fn decode_body<B>(body: B, encoding: Encoding) -> ResponseBody
where
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: StdError + Send + Sync + 'static,
{
    let chunks = TryStreamExt::map_err(BodyStream::new(body), io::Error::other)
        .try_filter_map(|frame| async move { Ok(frame.into_data().ok()) });

    let frames = futures::stream::unfold(
        (Box::pin(chunks), Some(Decoder::new(encoding))),
        |(mut chunks, decoder)| async move {
            let mut decoder = decoder?;
            loop {
                let step = match chunks.next().await {
                    Some(Ok(chunk)) => match decoder.write(&chunk) {
                        Ok(out) if out.is_empty() => continue,
                        Ok(out) => Ok(out),
                        Err(e) => return Some((Err(e), (chunks, None))),
                    },
                    Some(Err(e)) => return Some((Err(e), (chunks, None))),
                    None => {
                        return match decoder.finish() {
                            Ok(out) if out.is_empty() => None,
                            Ok(out) => Some((Ok(Frame::data(out)), (chunks, None))),
                            Err(e) => Some((Err(e), (chunks, None))),
                        };
                    }
                };
                return Some((step.map(Frame::data), (chunks, Some(decoder))));
            }
        },
    );

    StreamBody::new(frames).boxed_unsync()
}

fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
