use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use policychat::assistant::AssistantClient;
use policychat::chat::{ChatService, FileNameCache};
use policychat::web_search::GoogleSearchClient;
use policychat::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    if config.assistant.assistant_id.is_empty() {
        tracing::warn!("OPENAI_ASSISTANT_ID is not set; chat turns will be rejected");
    }

    let backend = Arc::new(AssistantClient::new(&config.assistant));
    let search = Arc::new(GoogleSearchClient::new(&config.search));
    let chat = ChatService::new(&config, backend, search.clone(), FileNameCache::new());

    run_server(config, chat, search).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
