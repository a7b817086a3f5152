//! Content loading by URI.
//!
//! Supported schemes:
//!
//! | scheme | source |
//! |---|---|
//! | `tidgi://<workspaceId>/<title>` | wiki tiddler text |
//! | `http://`, `https://` | response body |
//! | `file://<path>` | local file |

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{PromptError, Result};
use crate::services::{WIKI_CHANNEL_GET_TIDDLER_TEXT, WikiService};

#[async_trait]
pub trait UriLoader: Send + Sync {
    async fn load_content_from_uri(&self, uri: &str) -> Result<String>;
}

/// Loader dispatching on the URI scheme.
pub struct DefaultUriLoader {
    wiki: Arc<dyn WikiService>,
    client: reqwest::Client,
}

impl DefaultUriLoader {
    pub fn new(wiki: Arc<dyn WikiService>) -> Self {
        Self {
            wiki,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn load_tiddler(&self, rest: &str) -> Result<String> {
        let (workspace_id, title) = rest
            .split_once('/')
            .filter(|(w, t)| !w.is_empty() && !t.is_empty())
            .ok_or_else(|| PromptError::Uri(format!("Malformed wiki URI: tidgi://{}", rest)))?;

        let texts = self
            .wiki
            .wiki_operation_in_server(
                WIKI_CHANNEL_GET_TIDDLER_TEXT,
                workspace_id,
                vec![title.to_string()],
            )
            .await?;
        Ok(texts.concat())
    }

    async fn load_http(&self, uri: &str) -> Result<String> {
        let response = self.client.get(uri).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

impl std::fmt::Debug for DefaultUriLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultUriLoader").finish_non_exhaustive()
    }
}

#[async_trait]
impl UriLoader for DefaultUriLoader {
    async fn load_content_from_uri(&self, uri: &str) -> Result<String> {
        if let Some(rest) = uri.strip_prefix("tidgi://") {
            return self.load_tiddler(rest).await;
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return self.load_http(uri).await;
        }
        if let Some(path) = uri.strip_prefix("file://") {
            return Ok(tokio::fs::read_to_string(path).await?);
        }
        Err(PromptError::Uri(format!("Unsupported URI scheme: {}", uri)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryWikiService;

    fn loader() -> DefaultUriLoader {
        let wiki = InMemoryWikiService::new().with_tiddler("ws1", "Tool Script", "return 42;");
        DefaultUriLoader::new(Arc::new(wiki))
    }

    #[tokio::test]
    async fn test_load_tiddler() {
        let text = loader()
            .load_content_from_uri("tidgi://ws1/Tool Script")
            .await
            .unwrap();
        assert_eq!(text, "return 42;");
    }

    #[tokio::test]
    async fn test_load_tiddler_malformed() {
        let err = loader().load_content_from_uri("tidgi://ws1").await.unwrap_err();
        assert!(matches!(err, PromptError::Uri(_)));
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snippet.txt");
        std::fs::write(&path, "from disk").unwrap();

        let uri = format!("file://{}", path.display());
        assert_eq!(loader().load_content_from_uri(&uri).await.unwrap(), "from disk");

        let missing = format!("file://{}", dir.path().join("none.txt").display());
        assert!(matches!(
            loader().load_content_from_uri(&missing).await,
            Err(PromptError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let err = loader()
            .load_content_from_uri("ftp://example.com/x")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported URI scheme"));
    }
}
