use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AssistantConfig {
    pub base_url: String,
    pub api_key: String,
    pub assistant_id: String,
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub google_api_key: Option<String>,
    pub google_cse_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RunTuning {
    pub poll_interval: Duration,
    pub run_deadline: Duration,
    pub priming_search: bool,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub assistant: AssistantConfig,
    pub search: SearchConfig,
    pub run: RunTuning,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("POLICYCHAT_BIND").unwrap_or_else(|_| "127.0.0.1:3080".to_string()),
            assistant: AssistantConfig {
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                assistant_id: env::var("OPENAI_ASSISTANT_ID").unwrap_or_default(),
            },
            search: SearchConfig {
                google_api_key: env::var("GOOGLE_API_KEY").ok().filter(|v| !v.is_empty()),
                google_cse_id: env::var("GOOGLE_CSE_ID").ok().filter(|v| !v.is_empty()),
            },
            run: RunTuning {
                poll_interval: Duration::from_millis(
                    env::var("RUN_POLL_INTERVAL_MS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(1_000),
                ),
                run_deadline: Duration::from_secs(
                    env::var("RUN_DEADLINE_SECS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(120),
                ),
                priming_search: env::var("PRIMING_SEARCH")
                    .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
            },
        }
    }
}
