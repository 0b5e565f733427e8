//! `follow`: print a conversation's realtime changes until interrupted.

use anyhow::{Context, Result};
use client::{ApiClient, RealtimeEvents, RealtimeSubscriptionManager, SseFeedTransport};
use shared::{config::ClientConfig, models::Message};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Prints every change the subscription delivers, one line each.
#[derive(Debug, Default)]
pub struct PrintingEvents;

impl RealtimeEvents for PrintingEvents {
    fn on_new_message(&self, message: Message) {
        println!("+ {}", describe(&message));
    }

    fn on_message_update(&self, message: Message) {
        println!("~ {}", describe(&message));
    }

    fn on_message_delete(&self, message_id: Uuid) {
        println!("- {message_id}");
    }

    fn on_connection_change(&self, connected: bool) {
        if connected {
            eprintln!("[connected]");
        } else {
            eprintln!("[disconnected]");
        }
    }

    fn invalidate_messages(&self, conversation_id: Uuid) {
        eprintln!("[messages for {conversation_id} may be stale; reload to resync]");
    }

    fn set_ai_typing(&self, typing: bool) {
        if !typing {
            eprintln!("[ai stopped typing]");
        }
    }
}

/// One-line rendering of a message: time, author and text.
pub fn describe(message: &Message) -> String {
    let author = match (message.sender_participant_id, message.ai_persona_id) {
        (Some(participant), _) => participant.to_string(),
        (None, Some(persona)) => format!("ai:{persona}"),
        (None, None) => "system".to_string(),
    };
    let mut line = format!(
        "[{}] {} {author}: {}",
        message.created_at.format("%H:%M:%S"),
        message.id,
        message.content
    );
    if let Some(image_url) = &message.image_url {
        line.push_str(&format!(" <{image_url}>"));
    }
    if !message.reactions.is_empty() {
        let emoji: Vec<&str> = message.reactions.iter().map(|r| r.emoji.as_str()).collect();
        line.push_str(&format!(" ({})", emoji.join(" ")));
    }
    line
}

/// Follows `conversation_id` until Ctrl+C, then tears the subscription down.
///
/// # Errors
/// Returns an error if the API client cannot be built or the signal handler
/// cannot be installed.
pub async fn follow(
    config: &ClientConfig,
    conversation_id: Uuid,
    participant_id: Uuid,
) -> Result<()> {
    let api = ApiClient::from_config(config).context("failed to build API client")?;
    let manager = RealtimeSubscriptionManager::new(
        conversation_id,
        participant_id,
        config.realtime.clone(),
        Arc::new(SseFeedTransport::new(api.clone())),
        Arc::new(api),
        Arc::new(PrintingEvents),
    );

    println!("Following conversation {conversation_id} (press Ctrl+C to stop)");
    manager.subscribe();

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl+C handler")?;

    info!(conversation_id = %conversation_id, "stopping follow");
    manager.teardown();
    Ok(())
}
