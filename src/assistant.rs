use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::AssistantConfig;
use crate::models::{
    Annotation, AnnotationKind, AssistantText, RunSpec, RunState, RunStatus, RunStepInfo,
    ThreadMessage, ToolCall, ToolOutput, ToolSpec,
};

#[async_trait]
pub trait AssistantBackend: Send + Sync {
    async fn create_message(
        &self,
        thread_id: &str,
        role: &str,
        content: &str,
        metadata: Option<Value>,
    ) -> Result<String>;

    async fn create_run(&self, thread_id: &str, spec: &RunSpec) -> Result<RunState>;

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunState>;

    async fn list_run_steps(&self, thread_id: &str, run_id: &str) -> Result<Vec<RunStepInfo>>;

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<()>;

    // Most-recent-first, matching the backend's default ordering.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;

    async fn delete_message(&self, thread_id: &str, message_id: &str) -> Result<()>;

    async fn retrieve_file_name(&self, file_id: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct AssistantClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AssistantClient {
    pub fn new(config: &AssistantConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn expect_ok(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{what} returned {status}: {}", normalize_err_body(&body));
    }
}

#[async_trait]
impl AssistantBackend for AssistantClient {
    async fn create_message(
        &self,
        thread_id: &str,
        role: &str,
        content: &str,
        metadata: Option<Value>,
    ) -> Result<String> {
        #[derive(Serialize)]
        struct CreateMessageReq<'a> {
            role: &'a str,
            content: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            metadata: Option<Value>,
        }

        #[derive(Deserialize)]
        struct CreateMessageResp {
            id: String,
        }

        let response = self
            .request(Method::POST, &format!("/threads/{thread_id}/messages"))
            .json(&CreateMessageReq {
                role,
                content,
                metadata,
            })
            .send()
            .await
            .context("failed to call create-message endpoint")?;

        let response = Self::expect_ok(response, "create message").await?;
        let created = response
            .json::<CreateMessageResp>()
            .await
            .context("failed to decode create-message response")?;

        Ok(created.id)
    }

    async fn create_run(&self, thread_id: &str, spec: &RunSpec) -> Result<RunState> {
        #[derive(Serialize)]
        struct CreateRunReq<'a> {
            assistant_id: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            instructions: Option<&'a str>,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            tools: Vec<Value>,
            #[serde(skip_serializing_if = "Option::is_none")]
            tool_resources: Option<Value>,
        }

        let tools = spec.tools.iter().map(tool_spec_to_wire).collect();
        let tool_resources = if spec.vector_store_ids.is_empty() {
            None
        } else {
            Some(json!({
                "file_search": { "vector_store_ids": spec.vector_store_ids }
            }))
        };

        let response = self
            .request(Method::POST, &format!("/threads/{thread_id}/runs"))
            .json(&CreateRunReq {
                assistant_id: &spec.assistant_id,
                instructions: spec.instructions.as_deref(),
                tools,
                tool_resources,
            })
            .send()
            .await
            .context("failed to call create-run endpoint")?;

        let response = Self::expect_ok(response, "create run").await?;
        let run = response
            .json::<RunResp>()
            .await
            .context("failed to decode create-run response")?;

        Ok(run.into_run_state())
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunState> {
        let response = self
            .request(Method::GET, &format!("/threads/{thread_id}/runs/{run_id}"))
            .send()
            .await
            .context("failed to call get-run endpoint")?;

        let response = Self::expect_ok(response, "get run").await?;
        let run = response
            .json::<RunResp>()
            .await
            .context("failed to decode get-run response")?;

        Ok(run.into_run_state())
    }

    async fn list_run_steps(&self, thread_id: &str, run_id: &str) -> Result<Vec<RunStepInfo>> {
        #[derive(Deserialize)]
        struct StepList {
            #[serde(default)]
            data: Vec<WireStep>,
        }

        #[derive(Deserialize)]
        struct WireStep {
            id: String,
            #[serde(default)]
            step_details: Option<WireStepDetails>,
        }

        #[derive(Deserialize)]
        struct WireStepDetails {
            #[serde(default)]
            tool_calls: Vec<WireStepToolCall>,
        }

        #[derive(Deserialize)]
        struct WireStepToolCall {
            #[serde(rename = "type")]
            kind: String,
        }

        let response = self
            .request(
                Method::GET,
                &format!("/threads/{thread_id}/runs/{run_id}/steps"),
            )
            .send()
            .await
            .context("failed to call list-run-steps endpoint")?;

        let response = Self::expect_ok(response, "list run steps").await?;
        let steps = response
            .json::<StepList>()
            .await
            .context("failed to decode list-run-steps response")?;

        Ok(steps
            .data
            .into_iter()
            .map(|step| RunStepInfo {
                id: step.id,
                tool_kinds: step
                    .step_details
                    .map(|details| details.tool_calls.into_iter().map(|c| c.kind).collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<()> {
        #[derive(Serialize)]
        struct SubmitReq<'a> {
            tool_outputs: &'a [ToolOutput],
        }

        let response = self
            .request(
                Method::POST,
                &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            )
            .json(&SubmitReq {
                tool_outputs: outputs,
            })
            .send()
            .await
            .context("failed to call submit-tool-outputs endpoint")?;

        Self::expect_ok(response, "submit tool outputs").await?;
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        #[derive(Deserialize)]
        struct MessageList {
            #[serde(default)]
            data: Vec<WireMessage>,
        }

        let response = self
            .request(Method::GET, &format!("/threads/{thread_id}/messages"))
            .send()
            .await
            .context("failed to call list-messages endpoint")?;

        let response = Self::expect_ok(response, "list messages").await?;
        let messages = response
            .json::<MessageList>()
            .await
            .context("failed to decode list-messages response")?;

        Ok(messages
            .data
            .into_iter()
            .map(WireMessage::into_thread_message)
            .collect())
    }

    async fn delete_message(&self, thread_id: &str, message_id: &str) -> Result<()> {
        let response = self
            .request(
                Method::DELETE,
                &format!("/threads/{thread_id}/messages/{message_id}"),
            )
            .send()
            .await
            .context("failed to call delete-message endpoint")?;

        Self::expect_ok(response, "delete message").await?;
        Ok(())
    }

    async fn retrieve_file_name(&self, file_id: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct FileResp {
            filename: String,
        }

        let response = self
            .request(Method::GET, &format!("/files/{file_id}"))
            .send()
            .await
            .context("failed to call retrieve-file endpoint")?;

        let response = Self::expect_ok(response, "retrieve file").await?;
        let file = response
            .json::<FileResp>()
            .await
            .context("failed to decode retrieve-file response")?;

        Ok(file.filename)
    }
}

fn tool_spec_to_wire(tool: &ToolSpec) -> Value {
    match tool {
        ToolSpec::FileSearch => json!({ "type": "file_search" }),
        ToolSpec::Function {
            name,
            description,
            parameters,
        } => json!({
            "type": "function",
            "function": {
                "name": name,
                "description": description,
                "parameters": parameters,
            }
        }),
    }
}

#[derive(Deserialize)]
struct RunResp {
    id: String,
    status: String,
    #[serde(default)]
    last_error: Option<WireRunError>,
    #[serde(default)]
    required_action: Option<WireRequiredAction>,
}

#[derive(Deserialize)]
struct WireRunError {
    message: String,
}

#[derive(Deserialize)]
struct WireRequiredAction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    submit_tool_outputs: Option<WireSubmitToolOutputs>,
}

#[derive(Deserialize)]
struct WireSubmitToolOutputs {
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(default)]
    function: Option<WireFunction>,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

impl RunResp {
    fn into_run_state(self) -> RunState {
        let pending_tool_calls = self
            .required_action
            .filter(|action| action.kind == "submit_tool_outputs")
            .and_then(|action| action.submit_tool_outputs)
            .map(|submit| {
                submit
                    .tool_calls
                    .into_iter()
                    .map(|call| {
                        let (name, arguments) = call
                            .function
                            .map(|f| (f.name, f.arguments))
                            .unwrap_or_default();
                        ToolCall {
                            id: call.id,
                            name,
                            arguments,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        RunState {
            id: self.id,
            status: RunStatus::from_wire(&self.status),
            pending_tool_calls,
            last_error: self.last_error.map(|e| e.message),
        }
    }
}

#[derive(Deserialize)]
struct WireMessage {
    id: String,
    role: String,
    #[serde(default)]
    content: Vec<WireContent>,
}

#[derive(Deserialize)]
struct WireContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<WireText>,
}

#[derive(Deserialize)]
struct WireText {
    value: String,
    #[serde(default)]
    annotations: Vec<WireAnnotation>,
}

#[derive(Deserialize)]
struct WireAnnotation {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    file_citation: Option<WireFileCitation>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    url_citation: Option<WireUrlCitation>,
}

#[derive(Deserialize)]
struct WireUrlCitation {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct WireFileCitation {
    file_id: String,
    #[serde(default)]
    quote: Option<String>,
}

impl WireMessage {
    fn into_thread_message(self) -> ThreadMessage {
        // Take the first text block, like the UI route always has.
        let text = self
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .map(|text| AssistantText {
                content: text.value,
                annotations: text
                    .annotations
                    .into_iter()
                    .filter_map(wire_annotation)
                    .collect(),
            })
            .unwrap_or(AssistantText {
                content: String::new(),
                annotations: Vec::new(),
            });

        ThreadMessage {
            id: self.id,
            role: self.role,
            text,
        }
    }
}

fn wire_annotation(annotation: WireAnnotation) -> Option<Annotation> {
    match annotation.kind.as_str() {
        "file_citation" => {
            let citation = annotation.file_citation?;
            Some(Annotation {
                kind: AnnotationKind::FileCitation,
                file_id: Some(citation.file_id),
                quote: citation.quote,
                url: None,
            })
        }
        "url_citation" | "web_search_result" => Some(Annotation {
            kind: AnnotationKind::ExternalReference,
            file_id: None,
            quote: None,
            url: annotation
                .url
                .or(annotation.url_citation.and_then(|cited| cited.url)),
        }),
        _ => None,
    }
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
        if let Some(message) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
        {
            return message.to_string();
        }
    }

    trimmed.to_string()
}
