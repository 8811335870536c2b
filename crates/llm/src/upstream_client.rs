//! Sends chat-completions requests to the selected account's
//! OpenAI-compatible backend (spec.md §4.6).

use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;

use crate::{account_selector::SelectedAccount, error::DispatchError};

const DEFAULT_USER_AGENT: &str = concat!("relaygate/", env!("CARGO_PKG_VERSION"));

/// A complete, buffered upstream response (spec.md §4.6 non-streaming shape).
pub(crate) struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Opens `POST <baseApi>/chat/completions` against a selected account.
pub(crate) struct UpstreamClient {
    default_client: Client,
    request_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(request_timeout: Duration) -> anyhow::Result<Self> {
        let default_client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            default_client,
            request_timeout,
        })
    }

    /// One-shot, fully buffered request (spec.md §4.4 non-stream dispatch).
    pub async fn send(&self, account: &SelectedAccount, body: Vec<u8>) -> Result<UpstreamResponse, DispatchError> {
        let response = self
            .build_request(account, body)?
            .send()
            .await
            .map_err(|e| DispatchError::TransportError(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| DispatchError::TransportError(e.to_string()))?;

        Ok(UpstreamResponse { status, body })
    }

    /// Streaming request; yields raw body chunks for the SSE reframer (spec.md §4.5).
    pub async fn send_stream(
        &self,
        account: &SelectedAccount,
        body: Vec<u8>,
    ) -> Result<impl Stream<Item = Result<Bytes, DispatchError>> + use<>, DispatchError> {
        let response = self
            .build_request(account, body)?
            .send()
            .await
            .map_err(|e| DispatchError::TransportError(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response
                .bytes()
                .await
                .map_err(|e| DispatchError::TransportError(e.to_string()))?;
            return Err(DispatchError::UpstreamStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| DispatchError::TransportError(e.to_string()))))
    }

    fn build_request(&self, account: &SelectedAccount, body: Vec<u8>) -> Result<reqwest::RequestBuilder, DispatchError> {
        let client = self.client_for(account)?;
        let url = format!("{}/chat/completions", account.base_api.as_str().trim_end_matches('/'));
        let user_agent = account.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);

        Ok(client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", account.api_key.expose_secret()))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::USER_AGENT, user_agent)
            .body(body))
    }

    /// Per-account proxy requires its own `Client`; built lazily since most
    /// accounts have none configured.
    fn client_for(&self, account: &SelectedAccount) -> Result<Client, DispatchError> {
        let Some(proxy_url) = &account.proxy else {
            return Ok(self.default_client.clone());
        };

        let proxy = reqwest::Proxy::all(proxy_url.as_str()).map_err(|e| DispatchError::TransportError(e.to_string()))?;

        Client::builder()
            .timeout(self.request_timeout)
            .proxy(proxy)
            .build()
            .map_err(|e| DispatchError::TransportError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(base_api: &str) -> SelectedAccount {
        SelectedAccount {
            account_id: "acct_1".to_string(),
            api_key: secrecy::SecretString::from("sk-test"),
            base_api: base_api.parse().unwrap(),
            user_agent: None,
            proxy: None,
        }
    }

    #[test]
    fn chat_completions_path_is_appended_without_double_slash() {
        let client = UpstreamClient::new(Duration::from_secs(600)).unwrap();
        let request = client
            .build_request(&account("https://api.example.com/v1/"), Vec::new())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.url().as_str(), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn authorization_header_carries_bearer_prefix() {
        let client = UpstreamClient::new(Duration::from_secs(600)).unwrap();
        let request = client
            .build_request(&account("https://api.example.com/v1"), Vec::new())
            .unwrap()
            .build()
            .unwrap();
        let auth = request.headers().get(reqwest::header::AUTHORIZATION).unwrap();
        assert_eq!(auth, "Bearer sk-test");
    }
}
