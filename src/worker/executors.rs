//! Task Executors
//!
//! Maps a task kind to the async closure that performs it. The registry is
//! type-erased the same way handlers are registered elsewhere in the system,
//! so deployments can swap the built-in crawler or summarizer for a remote
//! service without touching the agent loop.

use anyhow::Result;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::store::types::TaskKind;

pub type ExecutorFn = Arc<
    dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// Registry mapping task kinds to their executor closures.
pub struct ExecutorRegistry {
    executors: DashMap<TaskKind, ExecutorFn>,
    timeout: Duration,
}

impl ExecutorRegistry {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            executors: DashMap::new(),
            timeout,
        })
    }

    pub fn register<F, Fut>(&self, kind: TaskKind, executor: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        let executor_fn: ExecutorFn = Arc::new(move |payload| {
            Box::pin(executor(payload))
                as Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>
        });

        self.executors.insert(kind, executor_fn);
        tracing::info!("Registered executor for {:?} tasks", kind);
    }

    /// Runs the executor for a kind under the configured hard timeout. A task
    /// that overruns counts as a failed attempt, same as an executor error.
    pub async fn execute(
        &self,
        kind: TaskKind,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let executor = self
            .executors
            .get(&kind)
            .map(|e| e.value().clone())
            .ok_or_else(|| anyhow::anyhow!("no executor registered for {:?}", kind))?;

        match tokio::time::timeout(self.timeout, executor(payload)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "executor for {:?} exceeded {:?}",
                kind,
                self.timeout
            )),
        }
    }

    pub fn has_executor(&self, kind: TaskKind) -> bool {
        self.executors.contains_key(&kind)
    }
}

#[derive(Debug, Deserialize)]
struct CrawlPayload {
    urls: Vec<String>,
    #[serde(default)]
    depth: u32,
}

#[derive(Debug, Deserialize)]
struct SummarizePayload {
    content: String,
    #[serde(default)]
    title: Option<String>,
}

const MAX_PAGES_PER_CRAWL: usize = 20;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const SUMMARY_SENTENCE_LIMIT: usize = 3;
const SUMMARY_CHAR_LIMIT: usize = 400;

/// Installs the built-in crawl executor: breadth-first page fetching from
/// the seed URLs, following in-page links up to the requested depth.
pub fn register_crawl_executor(registry: &ExecutorRegistry, client: reqwest::Client) {
    registry.register(TaskKind::Crawl, move |payload| {
        let client = client.clone();
        async move { crawl(client, payload).await }
    });
}

/// Installs the built-in summarize executor (extractive, no external calls).
pub fn register_summarize_executor(registry: &ExecutorRegistry) {
    registry.register(TaskKind::Summarize, |payload| async move {
        summarize(payload)
    });
}

/// Installs a forwarding executor that POSTs the payload to a remote service
/// and returns its JSON response, for deployments that run crawling or
/// summarization out of process.
pub fn register_remote_executor(
    registry: &ExecutorRegistry,
    kind: TaskKind,
    client: reqwest::Client,
    endpoint: String,
) {
    registry.register(kind, move |payload| {
        let client = client.clone();
        let endpoint = endpoint.clone();
        async move {
            let response = client
                .post(&endpoint)
                .json(&payload)
                .timeout(FETCH_TIMEOUT)
                .send()
                .await?;
            if !response.status().is_success() {
                anyhow::bail!("remote executor returned {}", response.status());
            }
            Ok(response.json().await?)
        }
    });
}

async fn crawl(client: reqwest::Client, payload: serde_json::Value) -> Result<serde_json::Value> {
    let request: CrawlPayload = serde_json::from_value(payload)?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut frontier: Vec<String> = request.urls;
    let mut pages = Vec::new();

    for _hop in 0..=request.depth {
        if frontier.is_empty() || pages.len() >= MAX_PAGES_PER_CRAWL {
            break;
        }

        let mut next_frontier = Vec::new();
        for url in frontier {
            if pages.len() >= MAX_PAGES_PER_CRAWL || !seen.insert(url.clone()) {
                continue;
            }

            match fetch_page(&client, &url).await {
                Ok((status, body)) => {
                    next_frontier.extend(extract_links(&body));
                    pages.push(serde_json::json!({
                        "url": url,
                        "status": status,
                        "bytes": body.len(),
                        "title": extract_title(&body),
                    }));
                }
                Err(e) => {
                    tracing::debug!("Fetch of {} failed: {}", url, e);
                    pages.push(serde_json::json!({
                        "url": url,
                        "error": e.to_string(),
                    }));
                }
            }
        }
        frontier = next_frontier;
    }

    Ok(serde_json::json!({ "pages": pages, "fetched": pages.len() }))
}

async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<(u16, String)> {
    let response = client.get(url).timeout(FETCH_TIMEOUT).send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    Ok((status, body))
}

/// Pulls absolute http(s) links out of a page with a plain scan; good enough
/// for news pages without an HTML parser dependency.
pub(crate) fn extract_links(html: &str) -> Vec<String> {
    let mut links = Vec::new();
    let mut rest = html;

    while let Some(pos) = rest.find("href=\"") {
        rest = &rest[pos + 6..];
        let Some(end) = rest.find('"') else { break };
        let link = &rest[..end];
        if link.starts_with("http://") || link.starts_with("https://") {
            links.push(link.to_string());
        }
        rest = &rest[end..];
    }

    links
}

pub(crate) fn extract_title(html: &str) -> Option<String> {
    let start = html.find("<title>")? + 7;
    let end = html[start..].find("</title>")? + start;
    let title = html[start..end].trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Extractive summary: the leading sentences of the article, capped by count
/// and length.
fn summarize(payload: serde_json::Value) -> Result<serde_json::Value> {
    let request: SummarizePayload = serde_json::from_value(payload)?;
    let content = request.content.trim();
    if content.is_empty() {
        anyhow::bail!("nothing to summarize");
    }

    let mut summary = String::new();
    let mut sentences = 0;
    for sentence in split_sentences(content) {
        if sentences >= SUMMARY_SENTENCE_LIMIT
            || summary.len() + sentence.len() > SUMMARY_CHAR_LIMIT
        {
            break;
        }
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(sentence);
        sentences += 1;
    }
    if summary.is_empty() {
        // One very long sentence: hard-truncate at a char boundary.
        let cut = content
            .char_indices()
            .take_while(|(i, _)| *i < SUMMARY_CHAR_LIMIT)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(content.len());
        summary = content[..cut].to_string();
    }

    Ok(serde_json::json!({
        "title": request.title,
        "summary": summary,
        "word_count": content.split_whitespace().count(),
    }))
}

fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
