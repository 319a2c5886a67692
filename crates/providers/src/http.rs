//! Reference HTTP transport.
//!
//! A thin [`ProviderTransport`] over `reqwest` for local mode: one
//! configured endpoint per provider id, streaming byte bodies, no retry
//! (transport retry is the deployment's concern; the core retries only
//! at the semantic layer).

use std::collections::HashMap;

use futures_util::StreamExt;

use ah_domain::capability::ProviderFamily;
use ah_domain::error::{Error, Result};

use crate::shape;
use crate::transport::{ProviderRequest, ProviderStream, ProviderTransport};

/// One configured provider endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub family: ProviderFamily,
    /// Base URL without a trailing slash, e.g. `https://api.anthropic.com`.
    pub base_url: String,
    pub api_key: String,
}

pub struct HttpTransport {
    endpoints: HashMap<String, EndpointConfig>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(endpoints: HashMap<String, EndpointConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { endpoints, client })
    }

    fn endpoint(&self, provider_id: &str) -> Result<&EndpointConfig> {
        self.endpoints.get(provider_id).ok_or_else(|| Error::Provider {
            provider: provider_id.to_string(),
            message: "no endpoint configured".into(),
        })
    }

    fn request_for(
        &self,
        cfg: &EndpointConfig,
        req: &ProviderRequest,
    ) -> reqwest::RequestBuilder {
        let base = cfg.base_url.trim_end_matches('/');
        match cfg.family {
            ProviderFamily::Anthropic => self
                .client
                .post(format!("{base}/v1/messages"))
                .header("x-api-key", &cfg.api_key)
                .header("anthropic-version", "2023-06-01"),
            ProviderFamily::OpenAi => self
                .client
                .post(format!("{base}/v1/responses"))
                .bearer_auth(&cfg.api_key),
            ProviderFamily::Gemini => self
                .client
                .post(format!(
                    "{base}/v1beta/models/{}:streamGenerateContent?alt=sse",
                    req.model
                ))
                .header("x-goog-api-key", &cfg.api_key),
            ProviderFamily::DeepSeek => self
                .client
                .post(format!("{base}/chat/completions"))
                .bearer_auth(&cfg.api_key),
            ProviderFamily::Bedrock => self
                .client
                .post(format!(
                    "{base}/model/{}/invoke-with-response-stream",
                    req.model
                ))
                .bearer_auth(&cfg.api_key),
        }
    }
}

#[async_trait::async_trait]
impl ProviderTransport for HttpTransport {
    async fn open_stream(&self, request: &ProviderRequest) -> Result<ProviderStream> {
        let cfg = self.endpoint(&request.provider_id)?;
        let body = shape::build_body(cfg.family, request);

        tracing::debug!(
            provider = %request.provider_id,
            family = %cfg.family,
            model = %request.model,
            "opening provider stream"
        );

        let resp = self
            .request_for(cfg, request)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: request.provider_id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        let provider_id = request.provider_id.clone();
        let bytes = resp
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| Error::Provider {
                    provider: provider_id.clone(),
                    message: e.to_string(),
                })
            })
            .boxed();

        Ok(ProviderStream {
            family: cfg.family,
            bytes,
        })
    }
}
