use async_trait::async_trait;
use reqwest::{Request, Response};

/// Seam over the HTTP transport so sources can be loaded without a network in tests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
