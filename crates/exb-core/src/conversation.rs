//! Conversation handler: one inbound message in, at most one ledger row and
//! exactly one reply out.
//!
//! Pipeline stages run strictly in order (`Parsing → Validating → Persisting`)
//! and any failure jumps straight to a failure reply. Nothing is retried.

use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::{
    categories::CategoryRegistry,
    domain::{ChatId, Sender},
    errors::Error,
    expense::LedgerRow,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, Command, IncomingUpdate, TextMessage},
    },
    ports::{ExpenseParser, LedgerStore},
};

pub const USAGE_TEXT: &str = "Send expense details (e.g., 'Coffee 120').\n\
You can name who paid (e.g., 'Taxi 500 paid by Sam'); otherwise the expense is recorded under your name.";

/// Pipeline step a message failed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Parsing,
    Validating,
    Persisting,
}

/// Result of handling one inbound update.
#[derive(Debug)]
pub enum Outcome {
    /// `/start` or `/help` answered with usage text.
    Usage,
    /// Update needs no reply (unknown command, blank text).
    Ignored,
    Recorded(LedgerRow),
    Failed { stage: Stage, error: Error },
}

struct Failure {
    stage: Stage,
    error: Error,
}

impl Failure {
    fn at(stage: Stage) -> impl FnOnce(Error) -> Failure {
        move |error| Failure { stage, error }
    }
}

/// Longest prefix of `text` within `max` UTF-16 code units (Telegram's length measure).
fn clip_utf16(text: &str, max: usize) -> &str {
    let mut units = 0;
    for (idx, ch) in text.char_indices() {
        units += ch.len_utf16();
        if units > max {
            return &text[..idx];
        }
    }
    text
}

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Drives parser → validator → ledger for each message and replies to the chat.
///
/// All collaborators are built once at startup and shared read-only.
pub struct ConversationHandler {
    parser: Arc<dyn ExpenseParser>,
    ledger: Arc<dyn LedgerStore>,
    registry: Arc<CategoryRegistry>,
    messenger: Arc<dyn MessagingPort>,
    currency_symbol: String,
    clock: fn() -> NaiveDateTime,
}

impl ConversationHandler {
    pub fn new(
        parser: Arc<dyn ExpenseParser>,
        ledger: Arc<dyn LedgerStore>,
        registry: Arc<CategoryRegistry>,
        messenger: Arc<dyn MessagingPort>,
        currency_symbol: impl Into<String>,
    ) -> Self {
        Self {
            parser,
            ledger,
            registry,
            messenger,
            currency_symbol: currency_symbol.into(),
            clock: local_now,
        }
    }

    /// Replace the wall clock used for row timestamps.
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub async fn handle(&self, update: IncomingUpdate) -> Outcome {
        match update {
            IncomingUpdate::Command(cmd) => self.handle_command(cmd).await,
            IncomingUpdate::Text(msg) => self.handle_text(msg).await,
        }
    }

    async fn handle_command(&self, cmd: Command) -> Outcome {
        match cmd.name.as_str() {
            "start" | "help" => {
                self.reply(cmd.chat_id, USAGE_TEXT).await;
                Outcome::Usage
            }
            other => {
                tracing::debug!(chat_id = cmd.chat_id.0, command = other, "ignoring unknown command");
                Outcome::Ignored
            }
        }
    }

    async fn handle_text(&self, msg: TextMessage) -> Outcome {
        if msg.text.trim().is_empty() {
            return Outcome::Ignored;
        }

        if self.messenger.capabilities().supports_chat_actions {
            let _ = self
                .messenger
                .send_chat_action(msg.chat_id, ChatAction::Typing)
                .await;
        }

        match self.record(&msg.text, &msg.sender).await {
            Ok(row) => {
                tracing::info!(
                    chat_id = msg.chat_id.0,
                    category = %row.category,
                    amount = row.amount,
                    "expense recorded"
                );
                self.reply(msg.chat_id, &self.success_text(&row)).await;
                Outcome::Recorded(row)
            }
            Err(Failure { stage, error }) => {
                tracing::warn!(chat_id = msg.chat_id.0, ?stage, "expense rejected: {error}");
                self.reply(msg.chat_id, error.user_message()).await;
                Outcome::Failed { stage, error }
            }
        }
    }

    async fn record(&self, text: &str, sender: &Sender) -> Result<LedgerRow, Failure> {
        tracing::trace!(stage = ?Stage::Parsing, "processing message");
        let candidate = self
            .parser
            .parse(text)
            .await
            .map_err(Failure::at(Stage::Parsing))?;

        let validated = self
            .registry
            .validate(candidate)
            .map_err(Failure::at(Stage::Validating))?;

        let row = LedgerRow::new(validated, &sender.handle(), (self.clock)());
        self.ledger
            .append_row(&row)
            .await
            .map_err(Failure::at(Stage::Persisting))?;

        Ok(row)
    }

    fn success_text(&self, row: &LedgerRow) -> String {
        format!(
            "✅ Added: {} - {}{} ({}), paid by {}",
            row.item, self.currency_symbol, row.amount, row.category, row.payer
        )
    }

    async fn reply(&self, chat_id: ChatId, text: &str) {
        let text = clip_utf16(text, self.messenger.capabilities().max_message_len);
        if let Err(e) = self.messenger.send_text(chat_id, text).await {
            tracing::warn!(chat_id = chat_id.0, "failed to send reply: {e}");
        }
    }
}
