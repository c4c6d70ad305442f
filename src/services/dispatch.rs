use reqwest::Client;
use serde_json::json;

use crate::config::AppConfig;

pub struct DispatchRequest<'a> {
    pub recipient: &'a str,
    pub template_key: &'a str,
    pub message: &'a str,
    /// e.g. "reminder:<uuid>"; lets the dispatcher correlate delivery
    /// callbacks without understanding billing.
    pub related_entity: &'a str,
}

/// Hand a rendered message to the external notification dispatcher.
///
/// Fire-and-forget from the billing engine's perspective: the caller records
/// a failure on the reminder row but never unwinds billing state over it.
/// With no dispatcher configured the handoff degrades to a log line, which
/// keeps local development and tests runnable.
pub async fn send(
    client: &Client,
    config: &AppConfig,
    request: &DispatchRequest<'_>,
) -> Result<(), String> {
    let Some(url) = config.dispatcher_url() else {
        tracing::info!(
            recipient = request.recipient,
            template = request.template_key,
            "No dispatcher configured; reminder logged only"
        );
        return Ok(());
    };

    let mut builder = client.post(url).json(&json!({
        "recipient": request.recipient,
        "template_key": request.template_key,
        "message": request.message,
        "related_entity": request.related_entity,
    }));
    if let Some(token) = &config.notify_dispatch_token {
        builder = builder.bearer_auth(token);
    }

    let response = builder.send().await.map_err(|error| {
        tracing::warn!(error = %error, "Notification dispatch request failed");
        "notification dispatch request failed".to_string()
    })?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(format!("dispatcher returned {status}"))
    }
}
