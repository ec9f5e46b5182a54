//! Page service backed by a CMS HTTP endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::models::{Page, PageDraft};
use super::PageService;
use crate::error::PublishError;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Posts page drafts as JSON to `{base_url}/pages`.
pub struct HttpPageService {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl std::fmt::Debug for HttpPageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPageService")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

impl HttpPageService {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
    ) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                PublishError::RequestFailed(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    pub fn pages_url(&self) -> String {
        format!("{}/pages", self.base_url)
    }
}

/// CMS response body; ids may be numeric or strings depending on the CMS.
#[derive(Debug, Deserialize)]
struct CreatedPage {
    id: Value,
    #[serde(default)]
    url: Option<String>,
}

fn parse_created_page(body: &str) -> Result<Page, PublishError> {
    let created: CreatedPage = serde_json::from_str(body)
        .map_err(|e| PublishError::InvalidResponse(format!("{}: {}", e, body)))?;

    let id = match created.id {
        Value::String(id) if !id.is_empty() => id,
        Value::Number(id) => id.to_string(),
        other => {
            return Err(PublishError::InvalidResponse(format!(
                "unusable page id: {}",
                other
            )))
        }
    };

    Ok(Page {
        id,
        url: created.url,
    })
}

#[async_trait]
impl PageService for HttpPageService {
    async fn create_page(&self, draft: PageDraft) -> Result<Page, PublishError> {
        let mut request = self.client.post(self.pages_url()).json(&draft);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PublishError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PublishError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(PublishError::Rejected {
                code: status.as_u16(),
                message: body,
            });
        }

        parse_created_page(&body)
    }
}
