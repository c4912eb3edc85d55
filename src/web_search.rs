use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::SearchConfig;

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct GoogleSearchClient {
    client: Client,
    api_key: Option<String>,
    cse_id: Option<String>,
}

impl GoogleSearchClient {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.google_api_key.clone(),
            cse_id: config.google_cse_id.clone(),
        }
    }

    fn not_configured_message(query: &str) -> String {
        format!(
            "Web search is not fully configured. Please add GOOGLE_API_KEY and GOOGLE_CSE_ID \
             to your environment variables.\n\n\
             For now, here's a simulated response for: \"{query}\"\n\n\
             1. [Example Result 1] - This would show real search results if Google API was configured.\n\
             2. [Example Result 2] - Configure your Google Custom Search API for actual web results.\n\
             3. [Example Result 3] - Visit https://developers.google.com/custom-search/v1/overview to get started."
        )
    }
}

#[async_trait]
impl SearchProvider for GoogleSearchClient {
    async fn search(&self, query: &str) -> Result<String> {
        let (Some(api_key), Some(cse_id)) = (&self.api_key, &self.cse_id) else {
            tracing::warn!("google search credentials not configured");
            return Ok(Self::not_configured_message(query));
        };

        #[derive(Deserialize)]
        struct SearchResp {
            #[serde(default)]
            items: Vec<SearchItem>,
        }

        #[derive(Deserialize)]
        struct SearchItem {
            title: String,
            link: String,
            #[serde(default)]
            snippet: Option<String>,
        }

        let response = self
            .client
            .get("https://www.googleapis.com/customsearch/v1")
            .query(&[
                ("key", api_key.as_str()),
                ("cx", cse_id.as_str()),
                ("q", query),
                ("num", "5"),
            ])
            .send()
            .await
            .context("failed to call google custom search")?
            .error_for_status()
            .context("google custom search returned non-success status")?
            .json::<SearchResp>()
            .await
            .context("failed to decode google custom search response")?;

        let mut formatted = format!("Web search results for: \"{query}\"\n\n");
        if response.items.is_empty() {
            formatted.push_str("No relevant results found for this query.");
            return Ok(formatted);
        }

        for (index, item) in response.items.iter().enumerate() {
            formatted.push_str(&format!("{}. [{}]({})\n", index + 1, item.title, item.link));
            if let Some(snippet) = &item.snippet {
                formatted.push_str(&format!("   {snippet}\n"));
            }
            formatted.push('\n');
        }

        Ok(formatted)
    }
}
