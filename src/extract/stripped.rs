use async_trait::async_trait;
use reqwest::Client;

use super::{download, visible_text, ExtractError, ExtractStrategy, Strategy};

/// Plain static fetch with tag-stripped text. The lowest-fidelity strategy
/// short of the snippet, but the one that works on almost anything.
pub struct StrippedFetch {
    http: Client,
}

impl StrippedFetch {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ExtractStrategy for StrippedFetch {
    fn kind(&self) -> Strategy {
        Strategy::Stripped
    }

    async fn extract(&self, url: &str) -> Result<String, ExtractError> {
        let (_, html) = download(&self.http, url).await?;
        let text = visible_text(&html);
        if text.is_empty() {
            return Err(ExtractError::Empty);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn strips_tags_from_static_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><body><script>var x = 1;</script><h1>Title</h1><p>Body text.</p></body></html>",
            ))
            .mount(&server)
            .await;

        let strategy = StrippedFetch::new(Client::new());
        let text = strategy
            .extract(&format!("{}/page", server.uri()))
            .await
            .unwrap();

        assert_eq!(text, "Title Body text.");
    }

    #[tokio::test]
    async fn decodes_declared_charset() {
        let server = MockServer::start().await;
        // "résumé" in ISO-8859-1 bytes.
        let body: Vec<u8> = vec![
            b'<', b'b', b'o', b'd', b'y', b'>', b'r', 0xE9, b's', b'u', b'm', 0xE9, b'<', b'/',
            b'b', b'o', b'd', b'y', b'>',
        ];
        Mock::given(method("GET"))
            .and(path("/latin1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(body, "text/html; charset=ISO-8859-1"),
            )
            .mount(&server)
            .await;

        let strategy = StrippedFetch::new(Client::new());
        let text = strategy
            .extract(&format!("{}/latin1", server.uri()))
            .await
            .unwrap();

        assert_eq!(text, "résumé");
    }

    #[tokio::test]
    async fn empty_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
            .mount(&server)
            .await;

        let strategy = StrippedFetch::new(Client::new());
        let result = strategy.extract(&format!("{}/empty", server.uri())).await;

        assert!(matches!(result, Err(ExtractError::Empty)));
    }

    #[tokio::test]
    async fn server_error_propagates_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/boom"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let strategy = StrippedFetch::new(Client::new());
        let result = strategy.extract(&format!("{}/boom", server.uri())).await;

        assert!(matches!(result, Err(ExtractError::Status(503))));
    }
}
