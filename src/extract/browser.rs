use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};

use super::{visible_text, ExtractError, ExtractStrategy, Strategy};

/// Browser-rendered DOM extraction for pages that only materialize under
/// JavaScript. headless_chrome is a synchronous API, so the whole render runs
/// on the blocking pool; the cascade timeout abandons the future but cannot
/// interrupt the worker thread, which finishes and is discarded.
pub struct BrowserRender;

impl BrowserRender {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BrowserRender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExtractStrategy for BrowserRender {
    fn kind(&self) -> Strategy {
        Strategy::BrowserRender
    }

    async fn extract(&self, url: &str) -> Result<String, ExtractError> {
        let url = url.to_string();
        let html = tokio::task::spawn_blocking(move || render_page(&url))
            .await
            .map_err(|e| ExtractError::Browser(format!("render task aborted: {e}")))??;

        let text = visible_text(&html);
        if text.is_empty() {
            return Err(ExtractError::Empty);
        }
        Ok(text)
    }
}

fn render_page(url: &str) -> Result<String, ExtractError> {
    let options = LaunchOptions::default_builder()
        .headless(true)
        .build()
        .map_err(|e| ExtractError::Browser(e.to_string()))?;
    let browser = Browser::new(options).map_err(|e| ExtractError::Browser(e.to_string()))?;

    let tab = browser
        .new_tab()
        .map_err(|e| ExtractError::Browser(e.to_string()))?;
    tab.navigate_to(url)
        .map_err(|e| ExtractError::Browser(e.to_string()))?;
    tab.wait_until_navigated()
        .map_err(|e| ExtractError::Browser(e.to_string()))?;
    tab.get_content()
        .map_err(|e| ExtractError::Browser(e.to_string()))
}
