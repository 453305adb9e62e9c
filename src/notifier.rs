use crate::errors::AppError;
use crate::models::AdminNotification;
use failsafe::{backoff, failure_policy, CircuitBreaker};
use std::sync::Arc;
use std::time::Duration;

/// Receives admin notifications after the unit of work that produced them
/// has committed.
pub trait NotificationSink: Send + Sync {
    /// Must not block; delivery failures are the sink's concern.
    fn dispatch(&self, notification: AdminNotification);
}

/// Forwards admin notifications to an HTTP webhook in the background.
pub struct NotificationRelay<CB> {
    client: reqwest::Client,
    url: String,
    breaker: Arc<CB>,
}

/// Breaker guarding the webhook: five consecutive failed deliveries open it,
/// then it retries after an exponential 10s to 60s backoff.
///
/// While open, notifications are dropped with a warning. They are already
/// committed to the store and stay readable through the admin listing.
pub fn relay_circuit_breaker() -> impl CircuitBreaker {
    let backoff_strategy = backoff::exponential(Duration::from_secs(10), Duration::from_secs(60));
    let policy = failure_policy::consecutive_failures(5, backoff_strategy);
    failsafe::Config::new().failure_policy(policy).build()
}

/// Builds a relay to `url` guarded by [`relay_circuit_breaker`].
pub fn webhook_sink(url: String) -> Result<Arc<dyn NotificationSink>, AppError> {
    let relay = NotificationRelay::new(url, relay_circuit_breaker())?;
    Ok(Arc::new(relay))
}

impl<CB> NotificationRelay<CB>
where
    CB: CircuitBreaker + Send + Sync + 'static,
{
    pub fn new(url: String, breaker: CB) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create relay client: {}", e))
            })?;

        Ok(Self {
            client,
            url,
            breaker: Arc::new(breaker),
        })
    }

    /// Posts one notification and waits for the response.
    pub async fn deliver(&self, notification: &AdminNotification) -> Result<(), AppError> {
        send_notification(&self.client, &self.url, notification).await
    }
}

async fn send_notification(
    client: &reqwest::Client,
    url: &str,
    notification: &AdminNotification,
) -> Result<(), AppError> {
    let response = client
        .post(url)
        .json(notification)
        .send()
        .await
        .map_err(|e| AppError::ExternalApiError(format!("Notification relay failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(AppError::ExternalApiError(format!(
            "Notification webhook returned {}: {}",
            status, error_text
        )));
    }

    Ok(())
}

impl<CB> NotificationSink for NotificationRelay<CB>
where
    CB: CircuitBreaker + Send + Sync + 'static,
{
    fn dispatch(&self, notification: AdminNotification) {
        if !self.breaker.is_call_permitted() {
            tracing::warn!(
                "Notification relay circuit open, dropping notification {}",
                notification.id
            );
            return;
        }

        let client = self.client.clone();
        let url = self.url.clone();
        let breaker = self.breaker.clone();

        tokio::spawn(async move {
            let outcome = send_notification(&client, &url, &notification).await;
            // Feed the outcome to the breaker so repeated failures open it
            match breaker.call(|| outcome) {
                Ok(()) => tracing::debug!("Relayed notification {}", notification.id),
                Err(failsafe::Error::Inner(e)) => {
                    tracing::error!("Failed to relay notification {}: {}", notification.id, e)
                }
                Err(failsafe::Error::Rejected) => tracing::warn!(
                    "Notification relay circuit opened, notification {} not sent",
                    notification.id
                ),
            }
        });
    }
}

/// Hands every committed notification to the sink, if one is configured.
pub fn dispatch_all(sink: Option<&Arc<dyn NotificationSink>>, notifications: Vec<AdminNotification>) {
    let Some(sink) = sink else {
        return;
    };
    for notification in notifications {
        sink.dispatch(notification);
    }
}
