use crate::domain::entities::{Request, Response};
use crate::domain::errors::{GurlError, Result};
use crate::domain::value_objects::Url;
use async_trait::async_trait;
use tracing::debug;

/// Trait for HTTP clients to enable mocking and dependency inversion
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;
}

/// Application service for sending one fully-built request
pub struct HttpRequestService {
    http_client: Box<dyn HttpClient>,
}

impl HttpRequestService {
    pub fn new(http_client: Box<dyn HttpClient>) -> Self {
        Self { http_client }
    }

    /// Validates and sends a request
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        RequestValidator::validate(&request)?;
        debug!(method = %request.method, url = %request.url.as_str(), "sending request");
        self.http_client.send(request).await
    }
}

/// Domain rules a request must satisfy before it reaches the transport
pub struct RequestValidator;

impl RequestValidator {
    pub fn validate(request: &Request) -> Result<()> {
        Self::validate_url(&request.url)
    }

    fn validate_url(url: &Url) -> Result<()> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GurlError::parse(format!(
                "unsupported scheme in {}: only http and https are supported",
                url.as_str()
            )));
        }
        if url.0.host().is_none_or(str::is_empty) {
            return Err(GurlError::parse(format!("missing host in {}", url.as_str())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{BodyPreview, Method};
    use bytes::Bytes;
    use http_body_util::{BodyExt, Empty};
    use hyper::header::HeaderMap;
    use hyper::{StatusCode, Version};

    fn request(url: &str) -> Request {
        Request {
            method: Method::Get,
            url: Url::new(url).unwrap(),
            headers: HeaderMap::new(),
            body: Empty::<Bytes>::new()
                .map_err(|never| match never {})
                .boxed_unsync(),
            preview: BodyPreview::Empty,
        }
    }

    fn response() -> Response {
        Response {
            status: StatusCode::NO_CONTENT,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            connection: None,
            body: Empty::<Bytes>::new()
                .map_err(|never| match never {})
                .boxed_unsync(),
        }
    }

    #[tokio::test]
    async fn valid_request_reaches_the_client() {
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .times(1)
            .returning(|_| Ok(response()));
        let service = HttpRequestService::new(Box::new(client));

        let response = service
            .send_request(request("http://example.com/"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unsupported_scheme_never_reaches_the_client() {
        let mut client = MockHttpClient::new();
        client.expect_send().never();
        let service = HttpRequestService::new(Box::new(client));

        let err = service
            .send_request(request("ftp://example.com/file"))
            .await
            .unwrap_err();
        assert!(matches!(err, GurlError::Parse(_)));
    }

    #[test]
    fn relative_urls_are_rejected() {
        assert!(RequestValidator::validate(&request("/only/a/path")).is_err());
    }
}
