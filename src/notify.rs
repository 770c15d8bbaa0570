//! Hand-off of finished jobs to an external persistence layer.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ShrinkrayError};
use crate::state_machine::Artifact;

/// Payload delivered once a job has produced its artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    /// `"audio"`, `"video"` or `"fragment"`.
    pub kind: String,
    pub artifact: Artifact,
}

/// Receives finished results. A failure here fails the job.
pub trait ResultSink: Send + Sync {
    fn deliver(&self, result: &JobResult) -> impl Future<Output = Result<()>> + Send;
}

/// POSTs each result as JSON to a fixed URL.
pub struct HttpNotifier {
    url: String,
    client: Client,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ResultSink for HttpNotifier {
    async fn deliver(&self, result: &JobResult) -> Result<()> {
        let response = self.client.post(&self.url).json(result).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ShrinkrayError::NotifyRejected {
                status: status.as_u16(),
            });
        }
        info!(job_id = %result.job_id, url = %self.url, "result delivered");
        Ok(())
    }
}

/// Sink used when no notify URL is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ResultSink for LogSink {
    async fn deliver(&self, result: &JobResult) -> Result<()> {
        info!(
            job_id = %result.job_id,
            kind = %result.kind,
            path = %result.artifact.path.display(),
            size_mb = result.artifact.size_mb,
            "job result ready"
        );
        Ok(())
    }
}

/// Either sink, chosen at startup from configuration.
pub enum Notifier {
    Http(HttpNotifier),
    Log(LogSink),
}

impl Notifier {
    pub fn from_url(url: Option<&str>) -> Result<Self> {
        match url {
            Some(url) => Ok(Notifier::Http(HttpNotifier::new(url)?)),
            None => Ok(Notifier::Log(LogSink)),
        }
    }
}

impl ResultSink for Notifier {
    async fn deliver(&self, result: &JobResult) -> Result<()> {
        match self {
            Notifier::Http(http) => http.deliver(result).await,
            Notifier::Log(log) => log.deliver(result).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample() -> JobResult {
        JobResult {
            job_id: "job-1".into(),
            kind: "audio".into(),
            artifact: Artifact {
                path: PathBuf::from("/data/song_57k.ogg"),
                size_mb: 5.7,
                media: None,
            },
        }
    }

    #[tokio::test]
    async fn posts_result_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/done"))
            .and(body_partial_json(serde_json::json!({
                "job_id": "job-1",
                "kind": "audio",
                "artifact": { "size_mb": 5.7 }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = HttpNotifier::new(format!("{}/done", server.uri())).unwrap();
        notifier.deliver(&sample()).await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let notifier = HttpNotifier::new(server.uri()).unwrap();
        let err = notifier.deliver(&sample()).await.unwrap_err();
        assert!(matches!(err, ShrinkrayError::NotifyRejected { status: 503 }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_notify_error() {
        let notifier = HttpNotifier::new("http://127.0.0.1:9/done").unwrap();
        let err = notifier.deliver(&sample()).await.unwrap_err();
        assert!(matches!(err, ShrinkrayError::Notify(_)));
    }

    #[tokio::test]
    async fn notifier_without_url_only_logs() {
        let notifier = Notifier::from_url(None).unwrap();
        assert!(matches!(notifier, Notifier::Log(_)));
        notifier.deliver(&sample()).await.unwrap();
    }
}
