pub mod mailgun;

pub use mailgun::MailgunNotifier;

use async_trait::async_trait;

/// Outbound mail for booking confirmations and cancellations. Failures are
/// logged by callers and never block settlement.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Development notifier: logs instead of sending.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(to, subject, body, "notification (noop)");
        Ok(())
    }
}
