//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - validates auth
//! - converts the teloxide message into a core `IncomingUpdate`
//! - serializes processing per chat and calls the conversation handler

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use exb_core::{
    domain::{ChatId, Sender, UserId},
    messaging::types::IncomingUpdate,
    security::is_authorized,
};

use crate::router::AppState;

pub const UNAUTHORIZED_REPLY: &str = "Unauthorized. Contact the bot owner for access.";

/// Dispatcher endpoint (polling mode).
pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    process_message(&state, &msg).await;
    Ok(())
}

/// Shared by polling and webhook delivery. Never fails; errors become replies.
pub async fn process_message(state: &AppState, msg: &Message) {
    let Some(update) = incoming_from_message(msg) else {
        return;
    };
    let chat_id = update.chat_id();
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));

    if !is_authorized(user_id, &state.allowed_users) {
        tracing::warn!(chat_id = chat_id.0, "unauthorized sender");
        if let Err(e) = state.messenger.send_text(chat_id, UNAUTHORIZED_REPLY).await {
            tracing::warn!(chat_id = chat_id.0, "failed to send reply: {e}");
        }
        return;
    }

    // Sequentialize messages per chat.
    let _guard = state.chat_locks.lock_chat(chat_id.0).await;
    state.conversation.handle(update).await;
}

/// Text messages with a known sender; everything else is ignored.
pub fn incoming_from_message(msg: &Message) -> Option<IncomingUpdate> {
    let text = msg.text()?;
    let user = msg.from()?;

    let sender = Sender {
        user_id: UserId(user.id.0 as i64),
        username: user.username.clone(),
        display_name: Some(user.full_name()),
    };

    Some(IncomingUpdate::from_text(ChatId(msg.chat.id.0), sender, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(json: serde_json::Value) -> Message {
        serde_json::from_value(json).unwrap()
    }

    fn text_message(text: &str, username: Option<&str>) -> Message {
        let mut from = serde_json::json!({ "id": 7, "is_bot": false, "first_name": "Alice" });
        if let Some(u) = username {
            from["username"] = serde_json::json!(u);
        }
        message(serde_json::json!({
            "message_id": 10,
            "date": 1_760_000_000,
            "chat": { "id": 42, "type": "private", "first_name": "Alice" },
            "from": from,
            "text": text,
        }))
    }

    #[test]
    fn converts_text_with_sender_identity() {
        let update = incoming_from_message(&text_message("Coffee 120", Some("alice"))).unwrap();
        let IncomingUpdate::Text(t) = update else {
            panic!("expected text");
        };
        assert_eq!(t.chat_id, ChatId(42));
        assert_eq!(t.text, "Coffee 120");
        assert_eq!(t.sender.user_id, UserId(7));
        assert_eq!(t.sender.handle(), "alice");
    }

    #[test]
    fn falls_back_to_display_name() {
        let update = incoming_from_message(&text_message("Tea 20", None)).unwrap();
        let IncomingUpdate::Text(t) = update else {
            panic!("expected text");
        };
        assert_eq!(t.sender.handle(), "Alice");
    }

    #[test]
    fn commands_are_classified() {
        let update = incoming_from_message(&text_message("/start", Some("alice"))).unwrap();
        assert!(matches!(update, IncomingUpdate::Command(ref c) if c.name == "start"));
    }
}
