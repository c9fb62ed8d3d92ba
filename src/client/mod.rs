use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Body as HyperBody, Client, Method, Request, Uri};
use hyper_tls::HttpsConnector;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::error::{ConfigError, RequestError};
use crate::models::dsl_model::DslConfig;

pub type HttpsClient = Client<HttpsConnector<HttpConnector>>;

pub fn build_client() -> HttpsClient {
    let https = HttpsConnector::new();
    Client::builder().build::<_, HyperBody>(https)
}

/// The request every iteration sends, prepared once from the config.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    uri: Uri,
    body: Bytes,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl RequestTemplate {
    pub fn from_config(config: &DslConfig) -> Result<Self, ConfigError> {
        let uri: Uri = config
            .target
            .parse()
            .map_err(|e| ConfigError::Validation(format!("target '{}': {}", config.target, e)))?;

        let body = Bytes::from(serde_json::to_vec(&config.payload)?);

        let mut headers = Vec::new();
        if let Some(extra) = &config.headers {
            for (name, value) in extra {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    ConfigError::Validation(format!("header name '{}': {}", name, e))
                })?;
                let value = HeaderValue::from_str(value).map_err(|e| {
                    ConfigError::Validation(format!("header '{}' value: {}", name, e))
                })?;
                headers.push((name, value));
            }
        }

        Ok(Self { uri, body, headers })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn build(&self) -> Result<Request<HyperBody>, RequestError> {
        let mut req_builder = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, "application/json");

        for (name, value) in &self.headers {
            req_builder = req_builder.header(name, value);
        }

        req_builder
            .body(HyperBody::from(self.body.clone()))
            .map_err(|e| RequestError::InvalidRequest(e.to_string()))
    }
}

/// Sends one request and reads the full response body, bounded by
/// `max_duration`. Returns the status code and the round-trip time.
pub async fn send_request(
    client: &HttpsClient,
    template: &RequestTemplate,
    max_duration: Duration,
) -> (Result<u16, RequestError>, Duration) {
    let request = match template.build() {
        Ok(request) => request,
        Err(e) => return (Err(e), Duration::ZERO),
    };

    let start = Instant::now();
    let result = match timeout(max_duration, exchange(client, request)).await {
        Ok(result) => result,
        Err(_) => Err(RequestError::Timeout),
    };
    (result, start.elapsed())
}

async fn exchange(client: &HttpsClient, request: Request<HyperBody>) -> Result<u16, RequestError> {
    let response = client.request(request).await.map_err(classify)?;
    let status = response.status().as_u16();
    hyper::body::to_bytes(response.into_body())
        .await
        .map_err(classify)?;
    Ok(status)
}

fn classify(e: hyper::Error) -> RequestError {
    if e.is_connect() {
        RequestError::Connect
    } else if e.is_timeout() {
        RequestError::Timeout
    } else if e.is_closed() {
        RequestError::Closed
    } else {
        RequestError::Other(e.to_string())
    }
}
