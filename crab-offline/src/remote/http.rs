// crab-offline/src/remote/http.rs
// HTTP 后端 - 与 POS 服务端通信

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use shared::models::{Session, SessionCreate, SessionOrder, SessionOrderCreate};
use shared::{ApiErrorBody, EntityKind, RemoteRow, SyncCursor};
use std::sync::Arc;
use std::time::Duration;

use super::{RemoteBackend, RemoteError, RemoteResult};

/// Supplies the bearer token for each request
///
/// Token acquisition and refresh belong to the authentication service; the
/// sync core only asks for the current value.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Fixed token, e.g. from `API_TOKEN`
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Pull endpoint response
#[derive(Deserialize)]
struct SyncPage {
    rows: Vec<RemoteRow>,
}

/// 网络 HTTP 后端
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        tokens: Arc<dyn TokenProvider>,
    ) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    /// 获取基础 URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match self.tokens.token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> RemoteResult<T> {
        let response = self.authorized(req).send().await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> RemoteResult<T> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await?;
            // 尝试解析为 API 错误响应
            if let Ok(body) = serde_json::from_str::<ApiErrorBody>(&text) {
                return Err(RemoteError::Api {
                    status: status.as_u16(),
                    code: body.error_code(),
                    message: body.message,
                });
            }
            let message = if text.is_empty() {
                status.canonical_reason().unwrap_or("Unknown error").to_string()
            } else {
                text
            };
            return Err(RemoteError::api(status.as_u16(), None, message));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn fetch_rows(
        &self,
        kind: EntityKind,
        after: Option<&SyncCursor>,
        limit: usize,
    ) -> RemoteResult<Vec<RemoteRow>> {
        let mut req = self
            .client
            .get(self.url(&format!("sync/{}", kind.resource())))
            .query(&[("limit", limit.to_string())]);
        if let Some(cursor) = after {
            req = req.query(&[
                ("after", cursor.last_modified.to_string()),
                ("after_id", cursor.last_id.clone()),
            ]);
        }
        let page: SyncPage = self.send(req).await?;
        Ok(page.rows)
    }

    async fn create_session(&self, req: &SessionCreate) -> RemoteResult<Session> {
        self.send(self.client.post(self.url("sessions")).json(req))
            .await
    }

    async fn create_order(&self, req: &SessionOrderCreate) -> RemoteResult<SessionOrder> {
        self.send(self.client.post(self.url("orders")).json(req))
            .await
    }

    async fn confirm_order(&self, order_id: &str) -> RemoteResult<SessionOrder> {
        self.send(
            self.client
                .patch(self.url(&format!("orders/{order_id}/confirm"))),
        )
        .await
    }

    async fn close_session(&self, session_id: &str) -> RemoteResult<Session> {
        self.send(
            self.client
                .post(self.url(&format!("sessions/{session_id}/close"))),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base_url: &str) -> HttpBackend {
        HttpBackend::new(
            base_url,
            Duration::from_secs(1),
            Arc::new(StaticToken(Some("secret".into()))),
        )
        .unwrap()
    }

    #[test]
    fn test_url_joining() {
        let backend = backend("http://pos.local/api/");
        assert_eq!(backend.base_url(), "http://pos.local/api");
        assert_eq!(backend.url("sessions"), "http://pos.local/api/sessions");
        assert_eq!(backend.url("/orders/1/confirm"), "http://pos.local/api/orders/1/confirm");
    }

    #[test]
    fn test_bearer_header() {
        let backend = backend("http://pos.local");
        let req = backend
            .authorized(backend.client.get(backend.url("sync/products")))
            .build()
            .unwrap();
        assert_eq!(
            req.headers().get(reqwest::header::AUTHORIZATION).unwrap(),
            "Bearer secret"
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let backend = backend("http://127.0.0.1:9");
        let err = backend
            .fetch_rows(EntityKind::Product, None, 10)
            .await
            .unwrap_err();
        assert!(err.is_connectivity(), "unexpected error: {err:?}");
    }
}
