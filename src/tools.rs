use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::models::{ToolCall, ToolOutput, ToolSpec};
use crate::web_search::SearchProvider;

pub const SEARCH_WEB_FUNCTION: &str = "search_web";

pub fn search_web_tool_spec() -> ToolSpec {
    ToolSpec::Function {
        name: SEARCH_WEB_FUNCTION.to_string(),
        description: "Search the live web and return formatted results with titles, links, and snippets.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        }),
    }
}

#[derive(Clone)]
pub struct ToolDispatcher {
    search: Arc<dyn SearchProvider>,
}

impl ToolDispatcher {
    pub fn new(search: Arc<dyn SearchProvider>) -> Self {
        Self { search }
    }

    // Every call id gets an output, even an unrecognized one; a missing
    // output leaves the run blocked on the backend side.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolOutput {
        let output = match call.name.as_str() {
            SEARCH_WEB_FUNCTION => self.dispatch_search(call).await,
            other => {
                tracing::warn!("unrecognized tool call {}: {:?}", call.id, other);
                format!("The tool \"{other}\" is not available.")
            }
        };

        ToolOutput {
            tool_call_id: call.id.clone(),
            output,
        }
    }

    async fn dispatch_search(&self, call: &ToolCall) -> String {
        #[derive(Deserialize)]
        struct SearchArgs {
            query: String,
        }

        let args: SearchArgs = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(err) => {
                tracing::warn!("malformed search_web arguments for {}: {err}", call.id);
                return "I couldn't run the web search because the search request was malformed. \
                        Please try rephrasing your question."
                    .to_string();
            }
        };

        match self.search.search(&args.query).await {
            Ok(results) => results,
            Err(err) => {
                tracing::warn!("web search failed for {}: {err:#}", call.id);
                format!("Error performing web search: {err}. Please try again later.")
            }
        }
    }
}
