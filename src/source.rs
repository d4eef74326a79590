use crate::config::Config;
use crate::error::FetchError;
use crate::telemetry::{parse_source_payload, Channel, ParsedPoll};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Pulls the latest readings for every configured channel from the upstream source.
#[derive(Clone, Debug)]
pub struct Fetcher {
    client: Client,
    url: String,
    channels: Vec<Channel>,
    batch_size: usize,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        Self::with_parts(
            config.source_url.clone(),
            config.channels.clone(),
            config.batch_size,
            config.request_timeout(),
        )
    }

    pub fn with_parts(
        url: String,
        channels: Vec<Channel>,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Request)?;
        Ok(Self {
            client,
            url,
            channels,
            batch_size,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<ParsedPoll, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| FetchError::from_reqwest(err, self.timeout))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status));
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| FetchError::from_reqwest(err, self.timeout))?;
        let mut body = body.to_vec();
        parse_source_payload(&mut body, &self.channels, self.batch_size)
    }
}
