use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex as StdMutex, MutexGuard},
};

use teloxide::{
    dispatching::Dispatcher,
    dptree,
    prelude::*,
    types::{Update, UpdateKind},
};

use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use exb_core::{config::Config, conversation::ConversationHandler, messaging::port::MessagingPort};

use crate::handlers;
use crate::server::{self, ServerState};

#[derive(Clone)]
pub struct AppState {
    pub conversation: Arc<ConversationHandler>,
    pub messenger: Arc<dyn MessagingPort>,
    pub allowed_users: Vec<i64>,
    pub chat_locks: Arc<ChatLocks>,
}

/// Per-chat mutexes. An entry lives only while some task holds or awaits it.
#[derive(Default)]
pub struct ChatLocks {
    inner: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> ChatGuard<'_> {
        let lock = self
            .map()
            .entry(chat_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.clone().lock_owned().await;
        ChatGuard {
            locks: self,
            chat_id,
            lock,
            guard: Some(guard),
        }
    }

    /// Number of chats with a live entry.
    pub fn tracked_chats(&self) -> usize {
        self.map().len()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<i64, Arc<Mutex<()>>>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Holds one chat's lock; drops the map entry when no other task wants it.
pub struct ChatGuard<'a> {
    locks: &'a ChatLocks,
    chat_id: i64,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ChatGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.map();
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            map.remove(&self.chat_id);
        }
    }
}

/// Run the bot until shutdown: long polling by default, webhook delivery when
/// a public URL is configured. The liveness endpoint runs in both modes.
pub async fn run(
    cfg: Arc<Config>,
    bot: Bot,
    conversation: Arc<ConversationHandler>,
    messenger: Arc<dyn MessagingPort>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    if let Ok(me) = bot.get_me().await {
        tracing::info!("expense bot started: @{}", me.username());
    }

    let state = Arc::new(AppState {
        conversation,
        messenger,
        allowed_users: cfg.telegram_allowed_users.clone(),
        chat_locks: Arc::new(ChatLocks::default()),
    });
    let addr = SocketAddr::new(cfg.bind_addr, cfg.port);

    match cfg.webhook_url.as_deref() {
        Some(base) => {
            run_webhook(&cfg, base, addr, bot, state, shutdown).await?;
        }
        None => {
            server::spawn(addr, ServerState::liveness_only(), shutdown.clone()).await?;
            run_polling(bot, state).await;
            shutdown.cancel();
        }
    }

    Ok(())
}

pub async fn run_polling(bot: Bot, state: Arc<AppState>) {
    tracing::info!("receiving updates by long polling");

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            tracing::debug!("unhandled update: {:?}", upd.kind);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error has occurred in the dispatcher",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn run_webhook(
    cfg: &Config,
    base: &str,
    addr: SocketAddr,
    bot: Bot,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel::<Update>(cfg.webhook_queue_capacity);
    server::spawn(
        addr,
        ServerState::webhook(tx, cfg.webhook_secret.clone()),
        shutdown.clone(),
    )
    .await?;

    let url = reqwest::Url::parse(&format!("{base}/webhook"))?;
    let mut req = bot.set_webhook(url.clone());
    if let Some(secret) = &cfg.webhook_secret {
        req = req.secret_token(secret.clone());
    }
    req.await?;
    tracing::info!("receiving updates by webhook at {url}");

    consume_updates(rx, state, shutdown).await;
    Ok(())
}

/// Drain the webhook queue, handling each update in its own task.
pub async fn consume_updates(
    mut rx: mpsc::Receiver<Update>,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(update) => update,
                None => break,
            },
        };

        let state = state.clone();
        tokio::spawn(async move {
            process_update(&state, update).await;
        });
    }
    tracing::info!("update queue consumer stopped");
}

pub async fn process_update(state: &AppState, update: Update) {
    match update.kind {
        UpdateKind::Message(msg) => handlers::process_message(state, &msg).await,
        other => tracing::debug!("ignoring update: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{build_router, tests::update_json};
    use async_trait::async_trait;
    use axum::{body::Body, http::Request, http::StatusCode};
    use exb_core::{
        categories::CategoryRegistry,
        domain::{ChatId, MessageId, MessageRef},
        errors::{Error, GENERIC_FAILURE_REPLY},
        expense::{ExpenseCandidate, LedgerRow},
        messaging::types::{ChatAction, MessagingCapabilities},
        ports::{ExpenseParser, LedgerStore},
        Result,
    };
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tower::ServiceExt;

    struct CoffeeParser;

    #[async_trait]
    impl ExpenseParser for CoffeeParser {
        async fn parse(&self, _text: &str) -> Result<ExpenseCandidate> {
            ExpenseCandidate::from_model_output(
                r#"{"expense":"Coffee","amount":120,"category":"Miscellaneous","person":""}"#,
            )
        }
    }

    struct UnreachableLedger;

    #[async_trait]
    impl LedgerStore for UnreachableLedger {
        async fn append_row(&self, _row: &LedgerRow) -> Result<()> {
            Err(Error::ServiceUnavailable("connection refused".to_string()))
        }
    }

    #[derive(Default)]
    struct FakeMessenger {
        sends: StdMutex<Vec<(ChatId, String)>>,
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_chat_actions: false,
                max_message_len: 4096,
            }
        }

        async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
            self.sends.lock().unwrap().push((chat_id, text.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }

        async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
            Ok(())
        }
    }

    fn state(messenger: Arc<FakeMessenger>, allowed_users: Vec<i64>) -> Arc<AppState> {
        let conversation = ConversationHandler::new(
            Arc::new(CoffeeParser),
            Arc::new(UnreachableLedger),
            Arc::new(CategoryRegistry::default()),
            messenger.clone(),
            "₹",
        );
        Arc::new(AppState {
            conversation: Arc::new(conversation),
            messenger,
            allowed_users,
            chat_locks: Arc::new(ChatLocks::default()),
        })
    }

    #[tokio::test]
    async fn webhook_acks_then_reports_ledger_outage() {
        let messenger = Arc::new(FakeMessenger::default());
        let state = state(messenger.clone(), vec![]);
        let (tx, mut rx) = mpsc::channel(4);

        let req = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .body(Body::from(update_json("Coffee 120").to_string()))
            .unwrap();
        let resp = build_router(ServerState::webhook(tx, None))
            .oneshot(req)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(messenger.sends.lock().unwrap().is_empty());

        let update = rx.recv().await.unwrap();
        process_update(&state, update).await;

        assert_eq!(
            *messenger.sends.lock().unwrap(),
            vec![(ChatId(42), GENERIC_FAILURE_REPLY.to_string())]
        );
    }

    #[tokio::test]
    async fn consumer_processes_queue_until_cancelled() {
        let messenger = Arc::new(FakeMessenger::default());
        let state = state(messenger.clone(), vec![]);
        let (tx, rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();

        let consumer = tokio::spawn(consume_updates(rx, state, shutdown.clone()));
        let update: Update = serde_json::from_value(update_json("Coffee 120")).unwrap();
        tx.send(update).await.unwrap();

        for _ in 0..100 {
            if !messenger.sends.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(messenger.sends.lock().unwrap().len(), 1);

        shutdown.cancel();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn unauthorized_sender_is_refused_without_processing() {
        let messenger = Arc::new(FakeMessenger::default());
        let state = state(messenger.clone(), vec![99]);

        let update: Update = serde_json::from_value(update_json("Coffee 120")).unwrap();
        process_update(&state, update).await;

        assert_eq!(
            *messenger.sends.lock().unwrap(),
            vec![(ChatId(42), handlers::UNAUTHORIZED_REPLY.to_string())]
        );
    }

    #[tokio::test]
    async fn chat_locks_serialize_same_chat() {
        let locks = ChatLocks::default();
        let first = locks.lock_chat(1).await;
        assert!(tokio::time::timeout(Duration::from_millis(20), locks.lock_chat(1))
            .await
            .is_err());
        // Other chats are independent.
        let _other = locks.lock_chat(2).await;
        drop(first);
        let _again = locks.lock_chat(1).await;
    }

    #[tokio::test]
    async fn chat_locks_forget_released_chats() {
        let locks = Arc::new(ChatLocks::default());
        for chat in 0..50 {
            let _guard = locks.lock_chat(chat).await;
        }
        assert_eq!(locks.tracked_chats(), 0);

        let first = locks.lock_chat(7).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock_chat(7).await;
            })
        };
        for _ in 0..200 {
            let refs = locks.map().get(&7).map(Arc::strong_count);
            if refs == Some(5) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(first);
        // The waiter still needs the entry.
        assert_eq!(locks.tracked_chats(), 1);
        waiter.await.unwrap();
        assert_eq!(locks.tracked_chats(), 0);
    }
}
