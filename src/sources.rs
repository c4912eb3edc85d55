use std::collections::HashSet;

use regex::Regex;
use url::Url;

use crate::models::{CitationDetails, Source, SourceKind};

const URL_PATTERN: &str = r#"https?://[^\s<>"]+"#;

const STRIPPED_EXTENSIONS: &[&str] = &[".html", ".htm", ".shtml", ".php", ".asp", ".aspx", ".pdf"];

// Pattern rules for deciding whether a web search produced usable results.
// Kept as data so the lists can be tuned without touching control flow.
#[derive(Debug, Clone)]
pub struct ClassifierRules {
    pub success_phrases: &'static [&'static str],
    pub factual_indicators: &'static [&'static str],
    pub no_result_phrases: &'static [&'static str],
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            success_phrases: &[
                "web search results for",
                "search results for",
                "based on the search",
                "based on my search",
                "according to the search",
                "i found the following",
                "here's what i found",
                "the search returned",
            ],
            factual_indicators: &[
                "secretary",
                "director",
                "administrator",
                "was appointed",
                "was confirmed",
                "currently serves",
                "announced",
                "as of",
            ],
            no_result_phrases: &[
                "no results",
                "no relevant results",
                "couldn't find any results",
                "could not find any results",
                "unable to find",
                "did not return any",
                "cannot browse",
                "don't have access to real-time",
            ],
        }
    }
}

// Heuristic, not a guarantee: false positives and negatives are expected.
pub fn web_search_had_results(content: &str, rules: &ClassifierRules) -> bool {
    if pattern(URL_PATTERN).is_match(content) {
        return true;
    }

    let lower = content.to_ascii_lowercase();
    if rules
        .success_phrases
        .iter()
        .any(|phrase| lower.contains(phrase))
    {
        return true;
    }

    if rules
        .no_result_phrases
        .iter()
        .any(|phrase| lower.contains(phrase))
    {
        return false;
    }
    rules
        .factual_indicators
        .iter()
        .any(|word| lower.contains(word))
}

pub fn extract_web_sources(content: &str) -> Vec<Source> {
    let re = pattern(URL_PATTERN);

    let mut seen: HashSet<String> = HashSet::new();
    let mut sources = Vec::new();
    for found in re.find_iter(content) {
        let cleaned = clean_url(found.as_str());
        if cleaned.is_empty() || !seen.insert(cleaned.clone()) {
            continue;
        }
        if let Some(source) = web_source_for_url(&cleaned) {
            sources.push(source);
        }
    }

    sources
}

// Shown when the classifier believes the search succeeded but no URL was
// extractable, so the UI always has a source row to render. A safety net,
// not a real citation.
pub fn fallback_web_source() -> Source {
    Source {
        kind: SourceKind::Web,
        document: "https://www.google.com/search".to_string(),
        section: "Web search results".to_string(),
        description: Some("Web search result from google.com".to_string()),
        details: CitationDetails::default(),
    }
}

pub fn clean_url(raw: &str) -> String {
    let mut url = raw;
    loop {
        let trimmed = url.trim_end_matches(['.', ',', ';', ':', '!', '?', '\'', '"']);
        let stripped = if trimmed.ends_with(')')
            && trimmed.matches('(').count() < trimmed.matches(')').count()
        {
            &trimmed[..trimmed.len() - 1]
        } else {
            trimmed
        };
        if stripped.len() == url.len() {
            return stripped.to_string();
        }
        url = stripped;
    }
}

fn web_source_for_url(cleaned: &str) -> Option<Source> {
    let parsed = Url::parse(cleaned).ok()?;
    let host = parsed.host_str()?;
    let domain = host.strip_prefix("www.").unwrap_or(host).to_string();

    let section = match readable_path_part(&parsed) {
        Some(part) => format!("Information from {domain} - {part}"),
        None => domain.clone(),
    };

    Some(Source {
        kind: SourceKind::Web,
        document: cleaned.to_string(),
        section,
        description: Some(format!("Web search result from {domain}")),
        details: CitationDetails::default(),
    })
}

fn readable_path_part(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).next_back()?;

    let mut part = segment.to_string();
    for ext in STRIPPED_EXTENSIONS {
        if let Some(stripped) = part.strip_suffix(ext) {
            part = stripped.to_string();
            break;
        }
    }

    let part = part.replace(['-', '_'], " ").trim().to_string();
    if part.is_empty() {
        None
    } else {
        Some(part)
    }
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).unwrap_or_else(|_| Regex::new("^$").unwrap())
}
