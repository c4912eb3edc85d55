use regex::Regex;

use crate::models::CitationDetails;

pub const NO_TITLE: &str = "No section title available";

struct FieldMatcher {
    name: &'static str,
    try_match: fn(&str) -> Option<String>,
}

// Applied in order; matchers are independent and more than one may fire.
const MATCHERS: &[FieldMatcher] = &[
    FieldMatcher {
        name: "page",
        try_match: match_page,
    },
    FieldMatcher {
        name: "paragraph",
        try_match: match_paragraph,
    },
    FieldMatcher {
        name: "citation",
        try_match: match_citation,
    },
    FieldMatcher {
        name: "chapter",
        try_match: match_chapter,
    },
    FieldMatcher {
        name: "section",
        try_match: match_section,
    },
    FieldMatcher {
        name: "heading",
        try_match: match_heading,
    },
    FieldMatcher {
        name: "regulation",
        try_match: match_regulation,
    },
    FieldMatcher {
        name: "federal_register",
        try_match: match_federal_register,
    },
];

pub fn extract_citation_details(quote: &str) -> CitationDetails {
    let mut details = CitationDetails::default();

    for matcher in MATCHERS {
        let Some(value) = (matcher.try_match)(quote) else {
            continue;
        };
        tracing::trace!("citation matcher {} fired: {}", matcher.name, value);

        match matcher.name {
            "page" => details.page = Some(value),
            "paragraph" => details.paragraph = Some(value),
            "citation" => details.citation = Some(value),
            "chapter" => details.chapter = Some(value),
            "section" => {
                // A section locator doubles as the citation when nothing
                // more specific matched.
                if details.citation.is_none() {
                    details.citation = Some(value.clone());
                }
                details.section = Some(value);
            }
            "heading" => details.heading = Some(value),
            "regulation" => details.regulation = Some(value),
            "federal_register" => details.federal_register = Some(value),
            _ => {}
        }
    }

    details
}

fn match_page(text: &str) -> Option<String> {
    let re = pattern(r"(?i)\b(?:pages?|pg|p)\.?\s*(\d+(?:\s*-\s*\d+)?)\b");
    let caps = re.captures(text)?;
    Some(caps.get(1)?.as_str().replace(char::is_whitespace, ""))
}

fn match_paragraph(text: &str) -> Option<String> {
    let re = pattern(r"(?i)(?:\bparagraphs?\b|\bpara\b|¶|§)\.?\s*(\d+(?:\.\d+)*)");
    let caps = re.captures(text)?;
    Some(caps.get(1)?.as_str().to_string())
}

fn match_citation(text: &str) -> Option<String> {
    let re = pattern(
        r"(?i)(?:\b(?:citation|cite|ref)s?\b\.?|§)\s*:?\s*([A-Za-z0-9][A-Za-z0-9.\-]*(?:\([A-Za-z0-9]+\))*)",
    );
    let caps = re.captures(text)?;
    Some(caps.get(1)?.as_str().trim_end_matches('.').to_string())
}

fn match_chapter(text: &str) -> Option<String> {
    let re = pattern(r"(?i)\b(?:chapter|ch)\.?\s*(\d+(?:\.\d+)*)\b");
    let caps = re.captures(text)?;
    Some(caps.get(1)?.as_str().to_string())
}

fn match_section(text: &str) -> Option<String> {
    let re = pattern(r"(?i)(?:\b(?:section|sec)\.?\s*)?\b(\d+-\d+(?:\.\d+)?)\b");
    let caps = re.captures(text)?;
    Some(caps.get(1)?.as_str().to_string())
}

fn match_heading(text: &str) -> Option<String> {
    let first = text.lines().next()?.trim();
    if first.is_empty() || first.len() > 120 {
        return None;
    }

    let numbered = pattern(r"^(?:[IVXLC]+|\d+(?:\.\d+)*)[.)]\s+\S.*$");
    if numbered.is_match(first) {
        return Some(first.trim_end_matches(':').to_string());
    }

    if is_all_caps_label(first) {
        return Some(first.trim_end_matches(':').to_string());
    }

    None
}

fn match_regulation(text: &str) -> Option<String> {
    let re = pattern(r"\b(\d+(?:\.\d+)+(?:\([A-Za-z0-9]+\))+)");
    let caps = re.captures(text)?;
    Some(caps.get(1)?.as_str().to_string())
}

fn match_federal_register(text: &str) -> Option<String> {
    let re = pattern(
        r"(?i)\b\d{3,6}\s+federal\s+register\s*/\s*vol\.?\s*\d+\s*,?\s*no\.?\s*\d+\s*/[^\n]*",
    );
    let found = re.find(text)?;
    Some(found.as_str().trim().to_string())
}

pub fn synthesize_section_title(
    quote: &str,
    details: &CitationDetails,
    document_name: &str,
    full_response: &str,
) -> String {
    let title = title_from_parts(quote, details, document_name);
    if title != NO_TITLE {
        return title;
    }

    // Source quotes can be raw extractions with no structure at all. As a
    // last resort, look for a sentence in the response body that mentions
    // the document and retry the same passes against it.
    if let Some(sentence) = sentence_mentioning(full_response, document_name) {
        let repaired_details = extract_citation_details(&sentence);
        let repaired = title_from_parts(&sentence, &repaired_details, document_name);
        if repaired != NO_TITLE {
            return repaired;
        }
    }

    NO_TITLE.to_string()
}

fn title_from_parts(quote: &str, details: &CitationDetails, document_name: &str) -> String {
    if let Some(heading) = &details.heading {
        return heading.clone();
    }

    let mut parts = Vec::new();
    if let Some(chapter) = &details.chapter {
        parts.push(format!("Chapter {chapter}"));
    }
    if let Some(section) = &details.section {
        parts.push(format!("Section {section}"));
    }
    if let Some(page) = &details.page {
        parts.push(format!("Page {page}"));
    }
    if !parts.is_empty() {
        return parts.join(", ");
    }

    if let Some(register_title) = federal_register_title(quote, details, document_name) {
        return register_title;
    }

    if let Some(first) = quote.lines().next() {
        let first = first.trim();
        if !first.is_empty() && first.len() < 100 {
            return first.to_string();
        }
    }

    NO_TITLE.to_string()
}

fn federal_register_title(
    quote: &str,
    details: &CitationDetails,
    document_name: &str,
) -> Option<String> {
    let re = pattern(r"\b(\d{4}-\d{5})\b");
    let register = re.captures(document_name)?.get(1)?.as_str().to_string();

    if let Some(label) = quote.lines().map(str::trim).find(|l| is_all_caps_label(l)) {
        return Some(format!(
            "Federal Register {register}, {}",
            label.trim_end_matches(':')
        ));
    }
    if let Some(page) = &details.page {
        return Some(format!("Federal Register {register}, Page {page}"));
    }

    Some(format!("Federal Register {register}"))
}

fn sentence_mentioning(text: &str, document_name: &str) -> Option<String> {
    let stem = document_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(document_name)
        .trim()
        .to_ascii_lowercase();
    if stem.is_empty() {
        return None;
    }

    for sentence in text.split(['.', '!', '?', '\n']) {
        let s = sentence.trim();
        if s.is_empty() {
            continue;
        }
        if s.to_ascii_lowercase().contains(&stem) {
            return Some(s.to_string());
        }
    }
    None
}

fn is_all_caps_label(line: &str) -> bool {
    let line = line.trim().trim_end_matches(':');
    if line.len() < 4 || line.split_whitespace().count() > 8 {
        return false;
    }

    let mut letters = 0usize;
    for c in line.chars() {
        if c.is_ascii_alphabetic() {
            if c.is_ascii_lowercase() {
                return false;
            }
            letters += 1;
        }
    }
    letters >= 4
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).unwrap_or_else(|_| Regex::new("^$").unwrap())
}
