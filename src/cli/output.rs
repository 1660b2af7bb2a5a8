use std::fmt::Write as FmtWrite;

use serde::Serialize;

use crate::error::PipelineError;
use crate::models::{AnswerReport, DocumentInfo, OutputFormat, RetrievalResults};
use crate::services::{History, MetricsSummary, PipelineState};

const PREVIEW_CHARS: usize = 200;

pub trait Formatter {
    fn format_answer(&self, report: &AnswerReport) -> String;
    fn format_retrieval(&self, results: &RetrievalResults) -> String;
    fn format_document(&self, info: &DocumentInfo) -> String;
    fn format_history(&self, history: &History) -> String;
    fn format_session(&self, session: &SessionInfo) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub state: PipelineState,
    pub document: Option<DocumentInfo>,
    pub questions: usize,
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub embedding_provider: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub chat_model: String,
    pub api_key_set: bool,
    pub index_backend: String,
    pub index_url: Option<String>,
    pub index_connected: bool,
    pub daemon_running: bool,
    pub daemon_idle_secs: Option<u64>,
    pub daemon_requests: Option<u64>,
    pub metrics: Option<MetricsSummary>,
}

/// Next step to suggest for a failed operation, shown under the error message.
pub fn error_hint(error: &PipelineError) -> Option<&'static str> {
    match error {
        PipelineError::Extraction(_) => Some("Open a different PDF or text file."),
        PipelineError::EmptyDocument => {
            Some("The document has no text layer (scanned PDFs are not supported). Open another file.")
        }
        PipelineError::IndexBuild(_) => {
            Some("Indexing failed; check the embedding provider and open the document again.")
        }
        PipelineError::EmbeddingUnavailable(_) => {
            Some("The embedding provider is unreachable; your question can be retried.")
        }
        PipelineError::EmptyIndex => Some("Open a document first."),
        PipelineError::Search(_) => {
            Some("The index backend did not answer; the document is still open, retry the question.")
        }
        PipelineError::Synthesis(_) => {
            Some("The answer could not be generated; your question can be retried.")
        }
        PipelineError::NotReady { .. } => Some("Wait for the current request to finish."),
        PipelineError::InvalidQuestion(_) | PipelineError::Superseded => None,
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}

fn location(page: Option<u32>, id: u32) -> String {
    match page {
        Some(page) => format!("page {}, chunk {}", page, id),
        None => format!("chunk {}", id),
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_answer(&self, report: &AnswerReport) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "{}\n", report.record.answer);
        if report.sources.is_empty() {
            return output;
        }

        let _ = writeln!(output, "Sources ({}ms):", report.duration_ms);
        for (i, source) in report.sources.iter().enumerate() {
            let _ = writeln!(
                output,
                "  {}. [{:.3}] {}",
                i + 1,
                source.score,
                location(source.chunk.page, source.chunk.id)
            );
        }
        output
    }

    fn format_retrieval(&self, results: &RetrievalResults) -> String {
        if results.is_empty() {
            return format!("No chunks found for: {}\n", results.query);
        }

        let mut output = String::new();
        let _ = writeln!(output, "Chunks for: \"{}\"", results.query);
        let _ = writeln!(
            output,
            "Retrieved {} chunks in {}ms\n",
            results.len(),
            results.duration_ms
        );

        for (i, result) in results.results.iter().enumerate() {
            let _ = writeln!(output, "{}. [Score: {:.3}]", i + 1, result.score);
            let _ = writeln!(
                output,
                "   Location: {}",
                location(result.chunk.page, result.chunk.id)
            );
            let _ = writeln!(output, "   ---");
            for line in preview(&result.chunk.text).lines() {
                let _ = writeln!(output, "   {}", line);
            }
            let _ = writeln!(output);
        }
        output
    }

    fn format_document(&self, info: &DocumentInfo) -> String {
        format!(
            "Loaded {} ({}, {} pages, {} chunks)\n",
            info.name, info.format, info.pages, info.chunks
        )
    }

    fn format_history(&self, history: &History) -> String {
        if history.is_empty() {
            return "No questions asked yet.\n".to_string();
        }

        let mut output = String::new();
        for (i, record) in history.iter().enumerate() {
            let _ = writeln!(output, "[{}] Q: {}", i + 1, record.question);
            let _ = writeln!(output, "    A: {}", record.answer.replace('\n', "\n       "));
        }
        output
    }

    fn format_session(&self, session: &SessionInfo) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "State:     {}", session.state);
        match &session.document {
            Some(doc) => {
                let _ = writeln!(output, "Document:  {}", doc.name);
                let _ = writeln!(output, "  Pages:   {}", doc.pages);
                let _ = writeln!(output, "  Chunks:  {}", doc.chunks);
            }
            None => {
                let _ = writeln!(output, "Document:  (none)");
            }
        }
        let _ = writeln!(output, "Questions: {}", session.questions);
        let _ = writeln!(output, "Top-k:     {}", session.top_k);
        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Status");
        let _ = writeln!(output, "------");

        let _ = writeln!(
            output,
            "Embeddings:    {} ({}, dim={})",
            status.embedding_provider, status.embedding_model, status.embedding_dimension
        );
        let _ = writeln!(output, "Chat model:    {}", status.chat_model);
        let key = if status.api_key_set { "[SET]" } else { "[MISSING]" };
        let _ = writeln!(output, "API key:       {}", key);
        let _ = writeln!(output);

        let index = if status.index_connected {
            "[CONNECTED]"
        } else {
            "[DISCONNECTED]"
        };
        let _ = writeln!(output, "Index:         {} {}", status.index_backend, index);
        if let Some(ref url) = status.index_url {
            let _ = writeln!(output, "  URL:         {}", url);
        }
        let _ = writeln!(output);

        let daemon = if status.daemon_running {
            "[RUNNING]"
        } else {
            "[STOPPED]"
        };
        let _ = writeln!(output, "Local daemon:  {}", daemon);
        if let Some(idle) = status.daemon_idle_secs {
            let _ = writeln!(output, "  Idle:        {}s", idle);
        }
        if let Some(requests) = status.daemon_requests {
            let _ = writeln!(output, "  Served:      {}", requests);
        }
        if let Some(ref m) = status.metrics {
            let _ = writeln!(output, "  Requests:    {} ({} texts)", m.total_requests, m.total_texts);
            let _ = writeln!(output, "  Avg Latency: {}ms", m.avg_latency_ms);
            if m.error_rate > 0.0 {
                let _ = writeln!(output, "  Error Rate:  {:.1}%", m.error_rate);
            }
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render(&self, value: &impl Serialize) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        let mut out = rendered.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string());
        out.push('\n');
        out
    }
}

impl Formatter for JsonFormatter {
    fn format_answer(&self, report: &AnswerReport) -> String {
        self.render(report)
    }

    fn format_retrieval(&self, results: &RetrievalResults) -> String {
        self.render(results)
    }

    fn format_document(&self, info: &DocumentInfo) -> String {
        self.render(info)
    }

    fn format_history(&self, history: &History) -> String {
        self.render(&serde_json::json!({ "history": history.iter().collect::<Vec<_>>() }))
    }

    fn format_session(&self, session: &SessionInfo) -> String {
        self.render(session)
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        self.render(status)
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", serde_json::json!({ "message": message }))
    }

    fn format_error(&self, error: &str) -> String {
        format!("{}\n", serde_json::json!({ "error": error }))
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_answer(&self, report: &AnswerReport) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "## {}\n", report.record.question);
        let _ = writeln!(output, "{}\n", report.record.answer);
        if report.sources.is_empty() {
            return output;
        }

        let _ = writeln!(output, "### Sources\n");
        let _ = writeln!(output, "| # | Score | Location |");
        let _ = writeln!(output, "|---|-------|----------|");
        for (i, source) in report.sources.iter().enumerate() {
            let _ = writeln!(
                output,
                "| {} | {:.3} | {} |",
                i + 1,
                source.score,
                location(source.chunk.page, source.chunk.id)
            );
        }
        output
    }

    fn format_retrieval(&self, results: &RetrievalResults) -> String {
        if results.is_empty() {
            return format!("## No chunks found\n\nQuery: `{}`\n", results.query);
        }

        let mut output = String::new();
        let _ = writeln!(output, "## Retrieved Chunks\n");
        let _ = writeln!(output, "**Query:** `{}`\n", results.query);
        let _ = writeln!(
            output,
            "Retrieved {} chunks in {}ms\n",
            results.len(),
            results.duration_ms
        );

        for (i, result) in results.results.iter().enumerate() {
            let _ = writeln!(output, "### {}. Score: {:.3}\n", i + 1, result.score);
            let _ = writeln!(
                output,
                "**Location:** {}\n",
                location(result.chunk.page, result.chunk.id)
            );
            let _ = writeln!(output, "```");
            let _ = writeln!(output, "{}", result.chunk.text);
            let _ = writeln!(output, "```\n");
        }
        output
    }

    fn format_document(&self, info: &DocumentInfo) -> String {
        format!(
            "> Loaded **{}** ({}, {} pages, {} chunks)\n",
            info.name, info.format, info.pages, info.chunks
        )
    }

    fn format_history(&self, history: &History) -> String {
        if history.is_empty() {
            return "## History\n\n*No questions asked yet.*\n".to_string();
        }

        let mut output = String::new();
        let _ = writeln!(output, "## History\n");
        for (i, record) in history.iter().enumerate() {
            let _ = writeln!(output, "### {}. {}\n", i + 1, record.question);
            let _ = writeln!(output, "{}\n", record.answer);
        }
        output
    }

    fn format_session(&self, session: &SessionInfo) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "## Session\n");
        let _ = writeln!(output, "- **State:** {}", session.state);
        if let Some(ref doc) = session.document {
            let _ = writeln!(
                output,
                "- **Document:** {} ({} pages, {} chunks)",
                doc.name, doc.pages, doc.chunks
            );
        }
        let _ = writeln!(output, "- **Questions:** {}", session.questions);
        let _ = writeln!(output, "- **Top-k:** {}", session.top_k);
        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "## Status\n");

        let _ = writeln!(output, "### Providers\n");
        let _ = writeln!(
            output,
            "- **Embeddings:** {} (`{}`, dim={})",
            status.embedding_provider, status.embedding_model, status.embedding_dimension
        );
        let _ = writeln!(output, "- **Chat model:** `{}`", status.chat_model);
        let key = if status.api_key_set { "✅" } else { "❌" };
        let _ = writeln!(output, "- **API key:** {}\n", key);

        let index = if status.index_connected { "✅" } else { "❌" };
        let _ = writeln!(output, "### Index ({}) {}\n", status.index_backend, index);
        if let Some(ref url) = status.index_url {
            let _ = writeln!(output, "- **URL:** `{}`\n", url);
        }

        let daemon = if status.daemon_running { "✅" } else { "❌" };
        let _ = writeln!(output, "### Local Daemon {}\n", daemon);
        if let Some(ref m) = status.metrics {
            let _ = writeln!(output, "- **Requests:** {}", m.total_requests);
            let _ = writeln!(output, "- **Avg Latency:** {}ms", m.avg_latency_ms);
            if m.error_rate > 0.0 {
                let _ = writeln!(output, "- **Error Rate:** {:.1}%", m.error_rate);
            }
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("> ⚠️ **Error:** {}\n", error)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, DocumentFormat, QueryRecord, ScoredChunk};

    fn report() -> AnswerReport {
        let sources = vec![
            ScoredChunk {
                chunk: Chunk {
                    id: 3,
                    text: "The lease ends in May.".to_string(),
                    source_offset: 2400,
                    page: Some(2),
                },
                score: 0.91,
            },
            ScoredChunk {
                chunk: Chunk {
                    id: 0,
                    text: "Parties to the agreement.".to_string(),
                    source_offset: 0,
                    page: None,
                },
                score: 0.42,
            },
        ];
        AnswerReport {
            document: "lease.pdf".to_string(),
            record: QueryRecord::new("When does the lease end?", "In May.", &sources),
            sources,
            duration_ms: 12,
        }
    }

    #[test]
    fn test_text_answer_lists_sources_in_order() {
        let output = TextFormatter.format_answer(&report());
        assert!(output.starts_with("In May."));
        let first = output.find("1. [0.910] page 2, chunk 3").unwrap();
        let second = output.find("2. [0.420] chunk 0").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_json_answer_is_valid() {
        let output = JsonFormatter::new(false).format_answer(&report());
        let value: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(value["record"]["answer"], "In May.");
        assert_eq!(value["sources"][0]["chunk"]["id"], 3);
    }

    #[test]
    fn test_markdown_answer_table() {
        let output = MarkdownFormatter.format_answer(&report());
        assert!(output.contains("## When does the lease end?"));
        assert!(output.contains("| 1 | 0.910 | page 2, chunk 3 |"));
    }

    #[test]
    fn test_history_rendering() {
        let mut history = History::new();
        assert_eq!(TextFormatter.format_history(&history), "No questions asked yet.\n");

        history.append(QueryRecord::new("first?", "one", &[]));
        history.append(QueryRecord::new("second?", "two", &[]));
        let output = TextFormatter.format_history(&history);
        assert!(output.find("[1] Q: first?").unwrap() < output.find("[2] Q: second?").unwrap());

        let json: serde_json::Value =
            serde_json::from_str(JsonFormatter::new(true).format_history(&history).trim()).unwrap();
        assert_eq!(json["history"][1]["question"], "second?");
    }

    #[test]
    fn test_document_line() {
        let info = DocumentInfo {
            id: "abc".to_string(),
            name: "lease.pdf".to_string(),
            format: DocumentFormat::Pdf,
            size_bytes: 10,
            pages: 3,
            chunks: 7,
        };
        assert_eq!(
            TextFormatter.format_document(&info),
            "Loaded lease.pdf (pdf, 3 pages, 7 chunks)\n"
        );
    }

    #[test]
    fn test_long_chunks_are_previewed() {
        let text = "x".repeat(PREVIEW_CHARS + 10);
        let shown = preview(&text);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
    }

    #[test]
    fn test_error_hints() {
        assert!(error_hint(&PipelineError::EmptyDocument).is_some());
        assert!(error_hint(&PipelineError::EmptyIndex).is_some());
        assert!(error_hint(&PipelineError::Superseded).is_none());

        let search = PipelineError::Search(crate::error::IndexError::SearchError("reset".into()));
        assert!(error_hint(&search).unwrap().contains("retry"));
    }

    #[test]
    fn test_error_formats() {
        assert_eq!(TextFormatter.format_error("boom"), "Error: boom\n");
        assert_eq!(
            JsonFormatter::new(false).format_error("boom"),
            "{\"error\":\"boom\"}\n"
        );
    }
}
