use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use futures::future::join_all;
use serde_json::json;

use crate::assistant::AssistantBackend;
use crate::citations::{extract_citation_details, synthesize_section_title};
use crate::config::AppConfig;
use crate::error::TurnError;
use crate::models::{
    AnnotationKind, AssistantText, RunSpec, Source, SourceKind, ToolSpec, TurnMode, TurnRequest,
    TurnResult,
};
use crate::run::RunController;
use crate::sources::{
    extract_web_sources, fallback_web_source, web_search_had_results, ClassifierRules,
};
use crate::tools::{search_web_tool_spec, ToolDispatcher};
use crate::web_search::SearchProvider;

const GROUNDED_INSTRUCTIONS: &str =
    "Use file search against the provided document collection for every answer. Do not answer \
     from memory: if the documents do not contain the requested information, say that the \
     uploaded documents do not cover it. When quoting a document, keep nearby section headings \
     and page markers inside the quote so the citation can be traced.";

const WEB_SEARCH_INSTRUCTIONS: &str =
    "The user has enabled live web search for this message. Call the search_web function to \
     gather current information and base the answer on those results, citing result URLs inline. \
     Prioritize web results over any uploaded documents and do not use file search for this \
     message.";

const PRIMING_QUESTION: &str =
    "Before we begin, use file search to list the topics covered by the uploaded documents.";

// Process-wide map of backend file ids to display names. File names never
// change once uploaded, so entries are never invalidated.
#[derive(Clone, Default)]
pub struct FileNameCache {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl FileNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_id: &str) -> Option<String> {
        self.inner.read().ok()?.get(file_id).cloned()
    }

    pub fn set(&self, file_id: &str, name: &str) {
        if let Ok(mut guard) = self.inner.write() {
            guard.insert(file_id.to_string(), name.to_string());
        }
    }
}

#[derive(Clone)]
pub struct ChatService {
    assistant_id: String,
    backend: Arc<dyn AssistantBackend>,
    runner: RunController,
    file_names: FileNameCache,
    classifier: ClassifierRules,
    priming_search: bool,
}

impl ChatService {
    pub fn new(
        config: &AppConfig,
        backend: Arc<dyn AssistantBackend>,
        search: Arc<dyn SearchProvider>,
        file_names: FileNameCache,
    ) -> Self {
        let runner = RunController::new(
            backend.clone(),
            ToolDispatcher::new(search),
            config.run.poll_interval,
            config.run.run_deadline,
        );

        Self {
            assistant_id: config.assistant.assistant_id.clone(),
            backend,
            runner,
            file_names,
            classifier: ClassifierRules::default(),
            priming_search: config.run.priming_search,
        }
    }

    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnResult, TurnError> {
        if request.thread_id.trim().is_empty() || request.message.trim().is_empty() {
            return Err(TurnError::BadRequest(
                "thread id and message are required".to_string(),
            ));
        }
        if self.assistant_id.trim().is_empty() {
            return Err(TurnError::Configuration(
                "assistant id is not set".to_string(),
            ));
        }

        let mode = TurnMode::for_request(&request);

        if let TurnMode::DocumentGrounded { vector_store_id } = &mode {
            if self.priming_search {
                self.run_priming_search(&request.thread_id, vector_store_id)
                    .await;
            }
        }

        let metadata = request
            .chart_data
            .as_ref()
            .map(|data| json!({ "chartData": data.to_string() }));
        self.backend
            .create_message(&request.thread_id, "user", &request.message, metadata)
            .await?;

        let spec = self.run_spec_for_mode(&mode);
        let completed = self
            .runner
            .run_to_completion(&request.thread_id, &spec)
            .await?;
        let text = completed.text;

        let mut sources = self.file_sources(&text).await;

        let web_search_used = mode == TurnMode::WebSearch;
        let mut had_results = false;
        if web_search_used {
            let mut web_sources = extract_web_sources(&text.content);
            had_results = web_search_had_results(&text.content, &self.classifier);
            if had_results && web_sources.is_empty() {
                web_sources.push(fallback_web_source());
            }
            sources.extend(web_sources);
        }

        tracing::info!(
            "turn on thread {} finished with {} sources (web search: {})",
            request.thread_id,
            sources.len(),
            web_search_used
        );

        Ok(TurnResult {
            content: text.content,
            sources,
            web_search_used,
            web_search_had_results: had_results,
        })
    }

    fn run_spec_for_mode(&self, mode: &TurnMode) -> RunSpec {
        match mode {
            TurnMode::WebSearch => RunSpec {
                assistant_id: self.assistant_id.clone(),
                instructions: Some(WEB_SEARCH_INSTRUCTIONS.to_string()),
                tools: vec![search_web_tool_spec()],
                vector_store_ids: Vec::new(),
            },
            TurnMode::DocumentGrounded { vector_store_id } => RunSpec {
                assistant_id: self.assistant_id.clone(),
                instructions: Some(GROUNDED_INSTRUCTIONS.to_string()),
                tools: vec![ToolSpec::FileSearch],
                vector_store_ids: vec![vector_store_id.clone()],
            },
            TurnMode::Plain => RunSpec {
                assistant_id: self.assistant_id.clone(),
                instructions: None,
                tools: Vec::new(),
                vector_store_ids: Vec::new(),
            },
        }
    }

    // Builds one file Source per unique file-citation annotation. Display
    // names are resolved through the cache with one scatter/gather pass
    // over the distinct file ids.
    async fn file_sources(&self, text: &AssistantText) -> Vec<Source> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut citations: Vec<(String, String)> = Vec::new();
        let mut file_ids: Vec<String> = Vec::new();

        for annotation in &text.annotations {
            if annotation.kind != AnnotationKind::FileCitation {
                continue;
            }
            let Some(file_id) = &annotation.file_id else {
                continue;
            };
            let quote = annotation.quote.clone().unwrap_or_default();
            if !seen.insert((file_id.clone(), quote.clone())) {
                continue;
            }
            if !file_ids.contains(file_id) {
                file_ids.push(file_id.clone());
            }
            citations.push((file_id.clone(), quote));
        }

        let resolved = join_all(file_ids.iter().map(|id| self.display_name(id))).await;
        let names: HashMap<String, String> = file_ids.into_iter().zip(resolved).collect();

        citations
            .into_iter()
            .map(|(file_id, quote)| {
                let document = names.get(&file_id).cloned().unwrap_or(file_id);
                let details = extract_citation_details(&quote);
                let section = synthesize_section_title(&quote, &details, &document, &text.content);
                Source {
                    kind: SourceKind::File,
                    document,
                    section,
                    description: None,
                    details,
                }
            })
            .collect()
    }

    async fn display_name(&self, file_id: &str) -> String {
        if let Some(name) = self.file_names.get(file_id) {
            return name;
        }

        match self.backend.retrieve_file_name(file_id).await {
            Ok(name) => {
                self.file_names.set(file_id, &name);
                name
            }
            Err(err) => {
                tracing::warn!("file name lookup failed for {file_id}: {err:#}");
                file_id.to_string()
            }
        }
    }

    // Forces a grounded fetch before the real turn, then removes both the
    // priming question and its answer so the visible transcript is
    // unaffected. Failures are logged and never fail the turn.
    async fn run_priming_search(&self, thread_id: &str, vector_store_id: &str) {
        if let Err(err) = self.try_priming_search(thread_id, vector_store_id).await {
            tracing::warn!("priming search skipped: {err:#}");
        }
    }

    async fn try_priming_search(
        &self,
        thread_id: &str,
        vector_store_id: &str,
    ) -> anyhow::Result<()> {
        let question_id = self
            .backend
            .create_message(thread_id, "user", PRIMING_QUESTION, None)
            .await?;

        let spec = RunSpec {
            assistant_id: self.assistant_id.clone(),
            instructions: Some(GROUNDED_INSTRUCTIONS.to_string()),
            tools: vec![ToolSpec::FileSearch],
            vector_store_ids: vec![vector_store_id.to_string()],
        };
        let completed = self.runner.run_to_completion(thread_id, &spec).await?;

        let steps = self
            .backend
            .list_run_steps(thread_id, &completed.run_id)
            .await
            .unwrap_or_default();
        let fetched = steps
            .iter()
            .any(|step| step.tool_kinds.iter().any(|kind| kind == "file_search"));
        tracing::debug!("priming search ran file_search: {fetched}");

        let messages = self.backend.list_messages(thread_id).await?;
        if let Some(answer) = messages.iter().find(|m| m.role == "assistant") {
            self.backend.delete_message(thread_id, &answer.id).await?;
        }
        self.backend.delete_message(thread_id, &question_id).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::config::{AssistantConfig, RunTuning, SearchConfig};
    use crate::models::{
        Annotation, RunState, RunStatus, RunStepInfo, ThreadMessage, ToolCall, ToolOutput,
    };

    #[derive(Default)]
    struct MockState {
        run_script: VecDeque<RunState>,
        final_content: String,
        annotations: Vec<Annotation>,
        echo_tool_outputs: bool,
        fail_delete: bool,
        created_messages: Vec<(String, String)>,
        submitted_outputs: Vec<ToolOutput>,
        deleted_messages: Vec<String>,
        run_specs: Vec<RunSpec>,
        create_run_calls: usize,
        retrieve_file_calls: usize,
        total_calls: usize,
    }

    #[derive(Default)]
    struct MockBackend {
        state: Mutex<MockState>,
    }

    impl MockBackend {
        fn with_content(content: &str, annotations: Vec<Annotation>) -> Self {
            let backend = MockBackend::default();
            {
                let mut state = backend.state.lock().unwrap();
                state.final_content = content.to_string();
                state.annotations = annotations;
            }
            backend
        }

        fn next_run_state(&self, state: &mut MockState) -> RunState {
            if state.run_script.len() > 1 {
                state.run_script.pop_front().unwrap()
            } else if let Some(front) = state.run_script.front() {
                front.clone()
            } else {
                RunState {
                    id: "run_1".to_string(),
                    status: RunStatus::Completed,
                    pending_tool_calls: Vec::new(),
                    last_error: None,
                }
            }
        }
    }

    #[async_trait]
    impl AssistantBackend for MockBackend {
        async fn create_message(
            &self,
            _thread_id: &str,
            role: &str,
            content: &str,
            _metadata: Option<Value>,
        ) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            state.total_calls += 1;
            state.created_messages.push((role.to_string(), content.to_string()));
            Ok(format!("msg_{}", state.created_messages.len()))
        }

        async fn create_run(&self, _thread_id: &str, spec: &RunSpec) -> Result<RunState> {
            let mut state = self.state.lock().unwrap();
            state.total_calls += 1;
            state.create_run_calls += 1;
            state.run_specs.push(spec.clone());
            let next = self.next_run_state(&mut state);
            Ok(next)
        }

        async fn get_run(&self, _thread_id: &str, _run_id: &str) -> Result<RunState> {
            let mut state = self.state.lock().unwrap();
            state.total_calls += 1;
            let next = self.next_run_state(&mut state);
            Ok(next)
        }

        async fn list_run_steps(
            &self,
            _thread_id: &str,
            _run_id: &str,
        ) -> Result<Vec<RunStepInfo>> {
            let mut state = self.state.lock().unwrap();
            state.total_calls += 1;
            Ok(vec![RunStepInfo {
                id: "step_1".to_string(),
                tool_kinds: vec!["file_search".to_string()],
            }])
        }

        async fn submit_tool_outputs(
            &self,
            _thread_id: &str,
            _run_id: &str,
            outputs: &[ToolOutput],
        ) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.total_calls += 1;
            state.submitted_outputs.extend(outputs.iter().cloned());
            Ok(())
        }

        async fn list_messages(&self, _thread_id: &str) -> Result<Vec<ThreadMessage>> {
            let mut state = self.state.lock().unwrap();
            state.total_calls += 1;
            let content = if state.echo_tool_outputs {
                let echoed: Vec<String> = state
                    .submitted_outputs
                    .iter()
                    .map(|o| o.output.clone())
                    .collect();
                format!("Echo: {}", echoed.join(" | "))
            } else {
                state.final_content.clone()
            };
            Ok(vec![ThreadMessage {
                id: "msg_a".to_string(),
                role: "assistant".to_string(),
                text: AssistantText {
                    content,
                    annotations: state.annotations.clone(),
                },
            }])
        }

        async fn delete_message(&self, _thread_id: &str, message_id: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.total_calls += 1;
            if state.fail_delete {
                anyhow::bail!("delete not supported");
            }
            state.deleted_messages.push(message_id.to_string());
            Ok(())
        }

        async fn retrieve_file_name(&self, file_id: &str) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            state.total_calls += 1;
            state.retrieve_file_calls += 1;
            Ok(format!("{file_id}.pdf"))
        }
    }

    struct MockSearch;

    #[async_trait]
    impl SearchProvider for MockSearch {
        async fn search(&self, query: &str) -> Result<String> {
            Ok(format!("results for {query}"))
        }
    }

    fn config(priming: bool) -> AppConfig {
        AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            assistant: AssistantConfig {
                base_url: "http://localhost".to_string(),
                api_key: "test".to_string(),
                assistant_id: "asst_test".to_string(),
            },
            search: SearchConfig {
                google_api_key: None,
                google_cse_id: None,
            },
            run: RunTuning {
                poll_interval: Duration::from_millis(1),
                run_deadline: Duration::from_secs(5),
                priming_search: priming,
            },
        }
    }

    fn service(backend: Arc<MockBackend>, priming: bool) -> ChatService {
        ChatService::new(
            &config(priming),
            backend,
            Arc::new(MockSearch),
            FileNameCache::new(),
        )
    }

    fn file_annotation(file_id: &str, quote: &str) -> Annotation {
        Annotation {
            kind: AnnotationKind::FileCitation,
            file_id: Some(file_id.to_string()),
            quote: Some(quote.to_string()),
            url: None,
        }
    }

    fn request(message: &str, vector_store: Option<&str>, web: bool) -> TurnRequest {
        TurnRequest {
            thread_id: "thread_1".to_string(),
            message: message.to_string(),
            vector_store_id: vector_store.map(str::to_string),
            use_web_search: web,
            chart_data: None,
        }
    }

    #[tokio::test]
    async fn grounded_turn_builds_file_source_with_locators() {
        let backend = Arc::new(MockBackend::with_content(
            "Owners must maintain the unit.",
            vec![file_annotation(
                "file_1",
                "Section 8-1: Owner Responsibility, Page 3",
            )],
        ));
        let chat = service(backend.clone(), false);

        let result = chat
            .process_turn(request("What are owner duties?", Some("vs_1"), false))
            .await
            .expect("turn should succeed");

        assert_eq!(result.sources.len(), 1);
        let source = &result.sources[0];
        assert_eq!(source.kind, SourceKind::File);
        assert_eq!(source.document, "file_1.pdf");
        assert!(source.section.contains("8-1"));
        assert_eq!(source.details.page.as_deref(), Some("3"));
        assert!(!result.web_search_used);

        let state = backend.state.lock().unwrap();
        let spec = &state.run_specs[0];
        assert!(matches!(spec.tools.as_slice(), [ToolSpec::FileSearch]));
        assert_eq!(spec.vector_store_ids, vec!["vs_1".to_string()]);
    }

    #[tokio::test]
    async fn web_turn_dedupes_urls_and_never_grounds() {
        let backend = Arc::new(MockBackend::with_content(
            "See https://www.hud.gov/program/hcv and https://www.hud.gov/program/rents. \
             Again: https://www.hud.gov/program/hcv.",
            Vec::new(),
        ));
        let chat = service(backend.clone(), false);

        let result = chat
            .process_turn(request("Latest rents?", Some("vs_1"), true))
            .await
            .expect("turn should succeed");

        assert!(result.web_search_used);
        assert!(result.web_search_had_results);
        assert_eq!(result.sources.len(), 2);
        assert!(result
            .sources
            .iter()
            .all(|s| s.kind == SourceKind::Web
                && s.description.as_deref() == Some("Web search result from hud.gov")));

        // Web search suppresses grounding even when a vector store was sent.
        let state = backend.state.lock().unwrap();
        let spec = &state.run_specs[0];
        assert!(spec.vector_store_ids.is_empty());
        assert!(matches!(
            spec.tools.as_slice(),
            [ToolSpec::Function { name, .. }] if name == "search_web"
        ));
    }

    #[tokio::test]
    async fn tool_output_flows_into_final_content() {
        let backend = Arc::new(MockBackend::default());
        {
            let mut state = backend.state.lock().unwrap();
            state.echo_tool_outputs = true;
            let search_call = ToolCall {
                id: "call_1".to_string(),
                name: "search_web".to_string(),
                arguments: r#"{"query":"current HUD secretary"}"#.to_string(),
            };
            state.run_script = VecDeque::from(vec![
                RunState {
                    id: "run_1".to_string(),
                    status: RunStatus::Queued,
                    pending_tool_calls: Vec::new(),
                    last_error: None,
                },
                RunState {
                    id: "run_1".to_string(),
                    status: RunStatus::RequiresAction,
                    pending_tool_calls: vec![search_call],
                    last_error: None,
                },
                RunState {
                    id: "run_1".to_string(),
                    status: RunStatus::Queued,
                    pending_tool_calls: Vec::new(),
                    last_error: None,
                },
                RunState {
                    id: "run_1".to_string(),
                    status: RunStatus::Completed,
                    pending_tool_calls: Vec::new(),
                    last_error: None,
                },
            ]);
        }
        let chat = service(backend.clone(), false);

        let result = chat
            .process_turn(request("Who runs HUD?", None, true))
            .await
            .expect("turn should succeed");

        assert!(result.content.contains("results for current HUD secretary"));
        let state = backend.state.lock().unwrap();
        assert_eq!(state.submitted_outputs.len(), 1);
        assert_eq!(state.submitted_outputs[0].tool_call_id, "call_1");
    }

    #[tokio::test]
    async fn failed_run_rejects_with_backend_message() {
        let backend = Arc::new(MockBackend::default());
        {
            let mut state = backend.state.lock().unwrap();
            state.run_script = VecDeque::from(vec![RunState {
                id: "run_1".to_string(),
                status: RunStatus::Failed,
                pending_tool_calls: Vec::new(),
                last_error: Some("assistant crashed".to_string()),
            }]);
        }
        let chat = service(backend, false);

        let err = chat
            .process_turn(request("hello", None, false))
            .await
            .expect_err("run failure must surface");
        match err {
            TurnError::RunFailed(message) => assert_eq!(message, "assistant crashed"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_message_rejects_before_any_backend_call() {
        let backend = Arc::new(MockBackend::default());
        let chat = service(backend.clone(), false);

        let err = chat
            .process_turn(request("   ", None, false))
            .await
            .expect_err("empty message must be rejected");
        assert!(matches!(err, TurnError::BadRequest(_)));
        assert_eq!(backend.state.lock().unwrap().total_calls, 0);
    }

    #[tokio::test]
    async fn missing_assistant_id_is_a_configuration_error() {
        let backend = Arc::new(MockBackend::default());
        let mut config = config(false);
        config.assistant.assistant_id = String::new();
        let chat = ChatService::new(
            &config,
            backend.clone(),
            Arc::new(MockSearch),
            FileNameCache::new(),
        );

        let err = chat
            .process_turn(request("hello", None, false))
            .await
            .expect_err("configuration error expected");
        assert!(matches!(err, TurnError::Configuration(_)));
        assert_eq!(backend.state.lock().unwrap().total_calls, 0);
    }

    #[tokio::test]
    async fn file_names_are_fetched_once_per_file_id() {
        let backend = Arc::new(MockBackend::with_content(
            "Two quotes, one document.",
            vec![
                file_annotation("file_1", "Chapter 8, Page 3"),
                file_annotation("file_1", "Chapter 12, Page 9"),
            ],
        ));
        let chat = service(backend.clone(), false);

        let result = chat
            .process_turn(request("duties?", Some("vs_1"), false))
            .await
            .expect("turn should succeed");
        assert_eq!(result.sources.len(), 2);
        assert_eq!(backend.state.lock().unwrap().retrieve_file_calls, 1);

        // A second turn hits the cache.
        chat.process_turn(request("more?", Some("vs_1"), false))
            .await
            .expect("turn should succeed");
        assert_eq!(backend.state.lock().unwrap().retrieve_file_calls, 1);
    }

    #[tokio::test]
    async fn duplicate_annotations_collapse_to_one_source() {
        let backend = Arc::new(MockBackend::with_content(
            "Same citation twice.",
            vec![
                file_annotation("file_1", "Chapter 8, Page 3"),
                file_annotation("file_1", "Chapter 8, Page 3"),
            ],
        ));
        let chat = service(backend, false);

        let result = chat
            .process_turn(request("duties?", Some("vs_1"), false))
            .await
            .expect("turn should succeed");
        assert_eq!(result.sources.len(), 1);
    }

    #[tokio::test]
    async fn priming_search_runs_and_cleans_up_transcript() {
        let backend = Arc::new(MockBackend::with_content("answer", Vec::new()));
        let chat = service(backend.clone(), true);

        chat.process_turn(request("question", Some("vs_1"), false))
            .await
            .expect("turn should succeed");

        let state = backend.state.lock().unwrap();
        assert_eq!(state.create_run_calls, 2, "priming run plus the real run");
        assert_eq!(state.created_messages.len(), 2);
        assert_eq!(state.created_messages[0].1, PRIMING_QUESTION);
        // Both the priming answer and the priming question are removed.
        assert_eq!(
            state.deleted_messages,
            vec!["msg_a".to_string(), "msg_1".to_string()]
        );
    }

    #[tokio::test]
    async fn priming_failure_never_fails_the_turn() {
        let backend = Arc::new(MockBackend::with_content("answer", Vec::new()));
        backend.state.lock().unwrap().fail_delete = true;
        let chat = service(backend, true);

        let result = chat
            .process_turn(request("question", Some("vs_1"), false))
            .await
            .expect("turn should still succeed");
        assert_eq!(result.content, "answer");
    }

    #[tokio::test]
    async fn successful_classification_without_urls_adds_fallback_source() {
        let backend = Arc::new(MockBackend::with_content(
            "The current secretary was appointed in March.",
            Vec::new(),
        ));
        let chat = service(backend, false);

        let result = chat
            .process_turn(request("who is the secretary?", None, true))
            .await
            .expect("turn should succeed");
        assert!(result.web_search_had_results);
        assert_eq!(result.sources.len(), 1);
        assert!(result.sources[0].document.contains("google.com"));
    }

    #[tokio::test]
    async fn plain_turn_sends_no_tools() {
        let backend = Arc::new(MockBackend::with_content("hi", Vec::new()));
        let chat = service(backend.clone(), false);

        chat.process_turn(request("hello", None, false))
            .await
            .expect("turn should succeed");

        let state = backend.state.lock().unwrap();
        let spec = &state.run_specs[0];
        assert!(spec.tools.is_empty());
        assert!(spec.vector_store_ids.is_empty());
        assert!(spec.instructions.is_none());
    }
}
