//! Per-channel delivery
//!
//! Every function here surfaces transport errors to the dispatcher, which
//! logs them; nothing validates response bodies beyond the status code.

use anyhow::Context;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::Client;
use serde_json::json;

use crate::config::{ChannelConfig, EmailChannel};

use super::NotificationKind;

/// Deliver one notification to a single channel.
pub(crate) async fn deliver(
    client: &Client,
    channel: &ChannelConfig,
    title: &str,
    message: &str,
    kind: NotificationKind,
) -> anyhow::Result<()> {
    match channel {
        ChannelConfig::Email(email) => send_email(email, title, message).await,
        ChannelConfig::Webhook { url } => send_webhook(client, url, title, message, kind).await,
        ChannelConfig::Discord { url } => send_discord(client, url, title, message, kind).await,
        ChannelConfig::Slack { url } => send_slack(client, url, title, message, kind).await,
    }
}

async fn send_email(channel: &EmailChannel, title: &str, message: &str) -> anyhow::Result<()> {
    let email = Message::builder()
        .from(channel.from.parse().context("invalid from address")?)
        .to(channel.to.parse().context("invalid to address")?)
        .subject(format!("[opsdeck] {title}"))
        .header(ContentType::TEXT_PLAIN)
        .body(message.to_string())
        .context("failed to build email")?;

    let mut builder = if channel.use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&channel.smtp_host)
            .context("failed to configure STARTTLS relay")?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&channel.smtp_host)
    };
    builder = builder.port(channel.smtp_port);

    if let Some((username, password)) = &channel.credentials {
        builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
    }

    builder
        .build()
        .send(email)
        .await
        .context("SMTP delivery failed")?;

    Ok(())
}

async fn send_webhook(
    client: &Client,
    url: &str,
    title: &str,
    message: &str,
    kind: NotificationKind,
) -> anyhow::Result<()> {
    let payload = json!({
        "title": title,
        "message": message,
        "type": kind.as_str(),
        "timestamp": Utc::now().to_rfc3339(),
    });

    let response = client
        .post(url)
        .json(&payload)
        .send()
        .await
        .context("failed to send webhook request")?;

    if !response.status().is_success() {
        anyhow::bail!("webhook responded with status {}", response.status());
    }

    Ok(())
}

async fn send_discord(
    client: &Client,
    url: &str,
    title: &str,
    message: &str,
    kind: NotificationKind,
) -> anyhow::Result<()> {
    let payload = json!({
        "embeds": [{
            "title": title,
            "description": message,
            "color": kind.color(),
            "timestamp": Utc::now().to_rfc3339(),
        }]
    });

    let response = client
        .post(url)
        .json(&payload)
        .send()
        .await
        .context("failed to send discord request")?;

    if !response.status().is_success() {
        anyhow::bail!("discord webhook responded with status {}", response.status());
    }

    Ok(())
}

async fn send_slack(
    client: &Client,
    url: &str,
    title: &str,
    message: &str,
    kind: NotificationKind,
) -> anyhow::Result<()> {
    let payload = json!({
        "attachments": [{
            "color": kind.color_hex(),
            "title": title,
            "text": message,
            "ts": Utc::now().timestamp(),
        }]
    });

    let response = client
        .post(url)
        .json(&payload)
        .send()
        .await
        .context("failed to send slack request")?;

    if !response.status().is_success() {
        anyhow::bail!("slack webhook responded with status {}", response.status());
    }

    Ok(())
}
