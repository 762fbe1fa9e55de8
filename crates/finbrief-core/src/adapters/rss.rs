use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::fetch::{FetchError, FetchFuture, Fetcher};
use crate::http_client::{execute_with_retry, HttpClient, HttpRequest};
use crate::retry::RetryConfig;
use crate::NewsItem;

/// Root elements of RSS 2.0, RSS 1.0 and Atom documents.
const FEED_ROOTS: &[&str] = &["rss", "RDF", "feed"];
const ENTRY_TAGS: &[&str] = &["item", "entry"];

/// A news outlet: display name plus RSS feed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsOutlet {
    pub name: String,
    pub feed_url: String,
}

impl NewsOutlet {
    pub fn new(name: impl Into<String>, feed_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            feed_url: feed_url.into(),
        }
    }
}

/// News fetcher bound to one RSS outlet.
#[derive(Clone)]
pub struct RssNewsFetcher {
    outlet: NewsOutlet,
    http_client: Arc<dyn HttpClient>,
    retry: RetryConfig,
    timeout_ms: u64,
}

impl RssNewsFetcher {
    pub fn new(outlet: NewsOutlet, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            outlet,
            http_client,
            retry: RetryConfig::default(),
            timeout_ms: 30_000,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn outlet(&self) -> &NewsOutlet {
        &self.outlet
    }

    async fn fetch_feed(&self) -> Result<Vec<NewsItem>, FetchError> {
        let request = HttpRequest::get(&self.outlet.feed_url)
            .with_header("accept", "application/rss+xml, application/xml, text/xml")
            .with_timeout_ms(self.timeout_ms);

        let response = execute_with_retry(self.http_client.as_ref(), request, &self.retry)
            .await
            .map_err(|error| FetchError::from_transport(&error))?;

        if !response.is_success() {
            return Err(FetchError::from_status(&response));
        }

        parse_feed(&response.body, &self.outlet.name, Utc::now())
    }
}

impl Fetcher for RssNewsFetcher {
    type Input = ();
    type Record = NewsItem;

    fn source(&self) -> &str {
        &self.outlet.name
    }

    fn fetch<'a>(&'a self, input: ()) -> FetchFuture<'a, NewsItem> {
        Box::pin(async move {
            self.fetch_feed()
                .await
                .map_err(|error| error.with_context(self.source(), &input))
        })
    }
}

/// Extract the entries of an RSS 2.0, RSS 1.0 (RDF) or Atom document.
///
/// Items without a title are dropped. A missing or unparseable date falls
/// back to `ingested_at`. A body that is not a feed is `Malformed`.
pub(crate) fn parse_feed(
    body: &str,
    source: &str,
    ingested_at: DateTime<Utc>,
) -> Result<Vec<NewsItem>, FetchError> {
    let document = Document::parse(body)
        .map_err(|error| FetchError::malformed(format!("response is not an RSS document: {error}")))?;
    let root = document.root_element().tag_name().name();
    if !FEED_ROOTS.contains(&root) {
        return Err(FetchError::malformed(format!(
            "response is not an RSS document: root element <{root}>"
        )));
    }

    let mut items = Vec::new();
    for node in document
        .descendants()
        .filter(|node| ENTRY_TAGS.contains(&node.tag_name().name()))
    {
        let Some(title) = child_text(&node, &["title"]) else {
            continue;
        };
        let url = child_link(&node).unwrap_or_default();
        let content = child_text(&node, &["description", "summary", "content", "encoded"])
            .unwrap_or_default();
        let published_at = child_text(&node, &["pubDate", "published", "updated", "date"])
            .and_then(|raw| parse_date(&raw))
            .unwrap_or(ingested_at);

        match NewsItem::new(title, content, source, url, published_at, ingested_at) {
            Ok(item) => items.push(item),
            Err(error) => tracing::debug!(source, %error, "dropping invalid feed item"),
        }
    }

    Ok(items)
}

/// Text of the first direct child element whose local name is in `names`,
/// with CDATA and entities resolved. Empty text counts as missing.
fn child_text(node: &Node<'_, '_>, names: &[&str]) -> Option<String> {
    node.children()
        .filter(|child| child.is_element() && names.contains(&child.tag_name().name()))
        .map(|child| {
            child
                .descendants()
                .filter(Node::is_text)
                .filter_map(|text| text.text())
                .collect::<String>()
        })
        .map(|text| text.trim().to_owned())
        .find(|text| !text.is_empty())
}

/// RSS carries the link as text, Atom as `href`.
fn child_link(node: &Node<'_, '_>) -> Option<String> {
    node.children()
        .filter(|child| child.is_element() && child.tag_name().name() == "link")
        .find_map(|child| {
            child
                .attribute("href")
                .or_else(|| child.text())
                .map(str::trim)
                .filter(|link| !link.is_empty())
                .map(str::to_owned)
        })
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
