use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::RANGE;
use reqwest::{Client, RequestBuilder};
use tracing::warn;
use crate::error::DownloadError;

pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub from: u64,
    pub to: Option<u64>,
}

impl ByteRange {
    pub fn new(from: u64, to: u64) -> ByteRange {
        ByteRange { from, to: Some(to) }
    }

    pub fn header_value(&self) -> String {
        match self.to {
            Some(to) => format!("bytes={}-{}", self.from, to),
            None => format!("bytes={}-", self.from),
        }
    }
}

pub type ByteStream = BoxStream<'static, crate::error::Result<Bytes>>;

pub struct TransportResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn issue_ranged_get(&self, url: &str, range: Option<ByteRange>) -> crate::error::Result<TransportResponse>;
}

pub type RequestDecorator = Arc<dyn Fn(RequestBuilder) -> RequestBuilder + Send + Sync>;

pub struct ReqwestTransport {
    client: Client,
    max_retries: usize,
    retry_delay: Duration,
    decorator: Option<RequestDecorator>,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> ReqwestTransport {
        ReqwestTransport {
            client,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            decorator: None,
        }
    }

    pub fn set_max_retries(mut self, max_retries: usize) -> ReqwestTransport {
        self.max_retries = max_retries;
        self
    }

    pub fn set_retry_delay(mut self, retry_delay: Duration) -> ReqwestTransport {
        self.retry_delay = retry_delay;
        self
    }

    pub fn set_decorator(mut self, decorator: RequestDecorator) -> ReqwestTransport {
        self.decorator = Some(decorator);
        self
    }

    fn build_request(&self, url: &str, range: Option<ByteRange>) -> RequestBuilder {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }
        match &self.decorator {
            Some(decorator) => decorator(request),
            None => request,
        }
    }

    async fn send_once(&self, url: &str, range: Option<ByteRange>) -> crate::error::Result<reqwest::Response> {
        let response = self.build_request(url, range).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus(status.as_u16()));
        }
        Ok(response)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        ReqwestTransport::new(Client::new())
    }
}

fn is_retryable(error: &DownloadError) -> bool {
    match error {
        DownloadError::Request(_) => true,
        DownloadError::HttpStatus(status) => *status >= 500 || *status == 408 || *status == 429,
        _ => false,
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn issue_ranged_get(&self, url: &str, range: Option<ByteRange>) -> crate::error::Result<TransportResponse> {
        let mut attempt = 0;
        let response = loop {
            match self.send_once(url, range).await {
                Ok(response) => break response,
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    attempt += 1;
                    warn!("request {} failed ({}), retry {}/{}", url, e, attempt, self.max_retries);
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        Ok(TransportResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            stream: response.bytes_stream().map_err(DownloadError::from).boxed(),
        })
    }
}
