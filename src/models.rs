use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    File,
    Web,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CitationDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paragraph: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regulation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub federal_register: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub document: String,
    pub section: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub details: CitationDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub content: String,
    pub sources: Vec<Source>,
    pub web_search_used: bool,
    pub web_search_had_results: bool,
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub thread_id: String,
    pub message: String,
    pub vector_store_id: Option<String>,
    pub use_web_search: bool,
    pub chart_data: Option<Value>,
}

// Web search suppresses document grounding for the turn, so the two can
// never be sent to the backend simultaneously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnMode {
    Plain,
    DocumentGrounded { vector_store_id: String },
    WebSearch,
}

impl TurnMode {
    pub fn for_request(request: &TurnRequest) -> Self {
        if request.use_web_search {
            return TurnMode::WebSearch;
        }
        match &request.vector_store_id {
            Some(id) if !id.trim().is_empty() => TurnMode::DocumentGrounded {
                vector_store_id: id.clone(),
            },
            _ => TurnMode::Plain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl RunStatus {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "queued" => RunStatus::Queued,
            "requires_action" => RunStatus::RequiresAction,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "cancelled" => RunStatus::Cancelled,
            "expired" => RunStatus::Expired,
            // cancelling and other transitional statuses keep the poll loop going
            _ => RunStatus::InProgress,
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            RunStatus::Failed | RunStatus::Cancelled | RunStatus::Expired
        )
    }
}

#[derive(Debug, Clone)]
pub struct RunState {
    pub id: String,
    pub status: RunStatus,
    pub pending_tool_calls: Vec<ToolCall>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationKind {
    FileCitation,
    ExternalReference,
}

#[derive(Debug, Clone)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub file_id: Option<String>,
    pub quote: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AssistantText {
    pub content: String,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub id: String,
    pub role: String,
    pub text: AssistantText,
}

#[derive(Debug, Clone)]
pub struct RunSpec {
    pub assistant_id: String,
    pub instructions: Option<String>,
    pub tools: Vec<ToolSpec>,
    pub vector_store_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum ToolSpec {
    FileSearch,
    Function {
        name: String,
        description: String,
        parameters: Value,
    },
}

#[derive(Debug, Clone)]
pub struct RunStepInfo {
    pub id: String,
    pub tool_kinds: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRequest {
    pub thread_id: String,
    pub message: String,
    #[serde(default)]
    pub vector_store_id: Option<String>,
    #[serde(default)]
    pub use_web_search: bool,
    #[serde(default)]
    pub chart_data: Option<Value>,
}

impl ChatMessageRequest {
    pub fn into_turn_request(self) -> TurnRequest {
        TurnRequest {
            thread_id: self.thread_id,
            message: self.message,
            vector_store_id: self.vector_store_id,
            use_web_search: self.use_web_search,
            chart_data: self.chart_data,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessageResponse {
    pub message: TurnResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchTestRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchTestResponse {
    pub success: bool,
    pub results: String,
}
