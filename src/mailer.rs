use async_trait::async_trait;
use tracing::info;

/// Outbound mail seam. The signup flow treats delivery as fire-and-forget;
/// a failed send is logged by the caller, never retried here.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Logs outgoing messages instead of delivering them. Stands in for a real
/// delivery backend in development and tests.
pub struct LogMailer {
    pub from: String,
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        info!(from = %self.from, %to, %subject, %body, "outgoing mail");
        Ok(())
    }
}
