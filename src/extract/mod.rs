//! Content extraction: a cascade of independent strategies producing
//! best-effort text for a URL, degrading to the search snippet and finally to
//! an explicit failure marker. Nothing in here is pipeline-fatal.

mod article;
mod browser;
mod stripped;

pub use article::ArticleStrategy;
pub use browser::BrowserRender;
pub use stripped::StrippedFetch;

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

/// Text shorter than this is kept only as a degraded candidate.
pub const ADEQUATE_LEN: usize = 500;
/// Extracted text is truncated to this many bytes (at a char boundary).
pub const MAX_TEXT_LEN: usize = 8000;
const MAX_RESPONSE_BYTES: usize = 10_000_000;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid URL: must be HTTP(S)")]
    InvalidScheme,

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("fetch failed: status {0}")]
    Status(u16),

    #[error("response too large (>{} bytes)", MAX_RESPONSE_BYTES)]
    TooLarge,

    #[error("article extraction failed: {0}")]
    Article(String),

    #[error("browser rendering failed: {0}")]
    Browser(String),

    #[error("no textual content")]
    Empty,
}

/// Which cascade step produced the text of an [`Extraction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Article,
    BrowserRender,
    Stripped,
    LinkHop,
    Snippet,
    /// Every strategy failed and no snippet existed; the text is a marker.
    Exhausted,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Article => "article",
            Strategy::BrowserRender => "browser-render",
            Strategy::Stripped => "stripped",
            Strategy::LinkHop => "link-hop",
            Strategy::Snippet => "snippet",
            Strategy::Exhausted => "none",
        }
    }
}

/// Outcome of one extraction cascade. `text` is never empty: at worst it
/// carries the failure marker (strategy [`Strategy::Exhausted`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub strategy: Strategy,
    pub adequate: bool,
}

/// One independent extraction strategy. Strategies must not consult each
/// other; the cascade owns ordering, timeouts, and fallback.
#[async_trait]
pub trait ExtractStrategy: Send + Sync {
    fn kind(&self) -> Strategy;

    async fn extract(&self, url: &str) -> Result<String, ExtractError>;
}

pub struct ContentExtractor {
    strategies: Vec<Box<dyn ExtractStrategy>>,
    /// Client for the link-hop HTML scan; `None` disables hops.
    hop_client: Option<Client>,
    strategy_timeout: Duration,
}

impl ContentExtractor {
    pub fn new(strategies: Vec<Box<dyn ExtractStrategy>>, strategy_timeout: Duration) -> Self {
        Self {
            strategies,
            hop_client: None,
            strategy_timeout,
        }
    }

    /// The production cascade: article extraction, browser rendering, then a
    /// plain tag-stripped fetch, with the link hop enabled.
    pub fn with_defaults(http: Client, strategy_timeout: Duration) -> Self {
        Self {
            strategies: vec![
                Box::new(ArticleStrategy::new(http.clone())),
                Box::new(BrowserRender::new()),
                Box::new(StrippedFetch::new(http.clone())),
            ],
            hop_client: Some(http),
            strategy_timeout,
        }
    }

    pub fn link_hop_via(mut self, http: Client) -> Self {
        self.hop_client = Some(http);
        self
    }

    /// Run the cascade. Never errors and never returns empty text; callers
    /// inspect `strategy`/`adequate` to classify the outcome.
    pub async fn extract(&self, url: &str, fallback_snippet: &str) -> Extraction {
        self.extract_inner(url, fallback_snippet, 1).await
    }

    fn extract_inner<'a>(
        &'a self,
        url: &'a str,
        snippet: &'a str,
        hops_left: u8,
    ) -> BoxFuture<'a, Extraction> {
        Box::pin(async move {
            let mut best: Option<(String, Strategy)> = None;

            if let Err(e) = validate_url(url) {
                warn!(%url, error = %e, "skipping extraction for invalid URL");
            } else {
                for strategy in &self.strategies {
                    let kind = strategy.kind();
                    match tokio::time::timeout(self.strategy_timeout, strategy.extract(url)).await
                    {
                        Ok(Ok(text)) => {
                            let text = truncate_at_boundary(text, MAX_TEXT_LEN);
                            debug!(%url, strategy = kind.as_str(), chars = text.len(), "strategy produced text");
                            if text.len() >= ADEQUATE_LEN {
                                return Extraction {
                                    text,
                                    strategy: kind,
                                    adequate: true,
                                };
                            }
                            if !text.trim().is_empty()
                                && best.as_ref().map_or(true, |(b, _)| text.len() > b.len())
                            {
                                best = Some((text, kind));
                            }
                        }
                        Ok(Err(e)) => {
                            debug!(%url, strategy = kind.as_str(), error = %e, "strategy failed")
                        }
                        Err(_) => {
                            debug!(%url, strategy = kind.as_str(), "strategy timed out")
                        }
                    }
                }

                if hops_left > 0 {
                    if let Some(next_url) = self.scan_for_article_link(url).await {
                        debug!(%url, %next_url, "following likely article link");
                        let hopped = self.extract_inner(&next_url, "", 0).await;
                        if !matches!(hopped.strategy, Strategy::Snippet | Strategy::Exhausted) {
                            if hopped.adequate {
                                return Extraction {
                                    text: hopped.text,
                                    strategy: Strategy::LinkHop,
                                    adequate: true,
                                };
                            }
                            if best.as_ref().map_or(true, |(b, _)| hopped.text.len() > b.len()) {
                                best = Some((hopped.text, Strategy::LinkHop));
                            }
                        }
                    }
                }
            }

            if let Some((text, strategy)) = best {
                return Extraction {
                    text,
                    strategy,
                    adequate: false,
                };
            }
            let snippet = snippet.trim();
            if !snippet.is_empty() {
                return Extraction {
                    text: snippet.to_string(),
                    strategy: Strategy::Snippet,
                    adequate: false,
                };
            }
            Extraction {
                text: format!("[Error fetching {url}: all extraction methods failed.]"),
                strategy: Strategy::Exhausted,
                adequate: false,
            }
        })
    }

    async fn scan_for_article_link(&self, url: &str) -> Option<String> {
        let http = self.hop_client.as_ref()?;
        let base = Url::parse(url).ok()?;
        let fetched =
            tokio::time::timeout(self.strategy_timeout, download(http, url)).await;
        match fetched {
            Ok(Ok((_, html))) => find_article_link(&html, &base),
            Ok(Err(e)) => {
                debug!(%url, error = %e, "link scan fetch failed");
                None
            }
            Err(_) => {
                debug!(%url, "link scan timed out");
                None
            }
        }
    }
}

pub(super) fn validate_url(raw: &str) -> Result<(), ExtractError> {
    let parsed = Url::parse(raw)?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(ExtractError::InvalidScheme),
    }
}

/// Download a page body, enforcing the size cap and decoding it with the
/// charset the server declared (UTF-8 otherwise). Returns the post-redirect
/// URL alongside the decoded body.
pub(super) async fn download(client: &Client, url: &str) -> Result<(String, String), ExtractError> {
    let response = client
        .get(url)
        .header("User-Agent", crate::USER_AGENT)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(ExtractError::Status(status.as_u16()));
    }

    let final_url = response.url().to_string();
    let charset = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(declared_charset);

    if let Some(len) = response.content_length() {
        if len as usize > MAX_RESPONSE_BYTES {
            return Err(ExtractError::TooLarge);
        }
    }

    let mut body = Vec::new();
    let mut stream = response;
    while let Some(chunk) = stream.chunk().await? {
        body.extend_from_slice(&chunk);
        if body.len() > MAX_RESPONSE_BYTES {
            return Err(ExtractError::TooLarge);
        }
    }

    Ok((final_url, decode_body(&body, charset.as_deref())))
}

fn declared_charset(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        part.trim()
            .to_ascii_lowercase()
            .strip_prefix("charset=")
            .map(|c| c.trim_matches('"').to_string())
    })
}

fn decode_body(bytes: &[u8], charset: Option<&str>) -> String {
    let encoding = charset
        .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// Tag-stripped visible text: drop script/style/noscript blocks, then collect
/// the body's text nodes with whitespace collapsed.
pub(super) fn visible_text(html: &str) -> String {
    let mut cleaned = html.to_string();
    for tag in ["script", "style", "noscript"] {
        cleaned = strip_tag_blocks(&cleaned, tag);
    }

    let document = Html::parse_document(&cleaned);
    let body = Selector::parse("body")
        .ok()
        .and_then(|s| document.select(&s).next());
    let text: String = match body {
        Some(element) => element.text().collect::<Vec<_>>().join(" "),
        None => document.root_element().text().collect::<Vec<_>>().join(" "),
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove every `<tag>...</tag>` block. Works on ASCII-lowercased offsets so
/// byte positions stay valid in the original string.
fn strip_tag_blocks(html: &str, tag: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;

    while let Some(offset) = lower[pos..].find(&open) {
        let start = pos + offset;
        let after = start + open.len();
        // Require a delimiter so `<style>` does not swallow `<styled-box>`.
        let is_tag_boundary = matches!(
            lower.as_bytes().get(after).copied(),
            None | Some(b' ') | Some(b'>') | Some(b'/') | Some(b'\n') | Some(b'\r') | Some(b'\t')
        );
        if !is_tag_boundary {
            out.push_str(&html[pos..after]);
            pos = after;
            continue;
        }

        out.push_str(&html[pos..start]);
        pos = match lower[start..].find(&close) {
            Some(end) => start + end + close.len(),
            None => match lower[start..].find('>') {
                Some(gt) => start + gt + 1,
                None => html.len(),
            },
        };
    }
    out.push_str(&html[pos..]);
    out
}

/// First same-host link whose href looks like an article: contains one of the
/// content tokens or a plausible 4-digit year.
fn find_article_link(html: &str, base: &Url) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").ok()?;
    let host = base.host_str()?.to_string();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(absolute) = base.join(href) else {
            continue;
        };
        if absolute.host_str() != Some(host.as_str()) {
            continue;
        }
        if looks_like_article_href(&href.to_ascii_lowercase()) {
            return Some(absolute.to_string());
        }
    }
    None
}

fn looks_like_article_href(href: &str) -> bool {
    const TOKENS: [&str; 5] = ["article", "news", "story", "item", "detail"];
    TOKENS.iter().any(|t| href.contains(t)) || contains_year(href)
}

fn contains_year(href: &str) -> bool {
    href.as_bytes().windows(4).any(|w| {
        w.iter().all(|b| b.is_ascii_digit()) && (w.starts_with(b"19") || w.starts_with(b"20"))
    })
}

fn truncate_at_boundary(mut text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text
}
