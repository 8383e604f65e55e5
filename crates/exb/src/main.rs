use std::sync::Arc;

use exb_core::{
    config::Config, conversation::ConversationHandler, messaging::port::MessagingPort,
};
use exb_openai::OpenAiClient;
use exb_sheets::{SheetsConfig, SheetsLedger};
use exb_telegram::TelegramMessenger;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    exb_core::logging::init("exb")?;

    let cfg = Arc::new(Config::load()?);
    let registry = Arc::new(cfg.categories.clone());
    tracing::info!(
        categories = ?registry.categories(),
        webhook = cfg.webhook_mode(),
        "starting expense bot"
    );

    let parser = Arc::new(OpenAiClient::new(
        cfg.openai_api_key.clone(),
        cfg.openai_model.clone(),
        cfg.openai_base_url.clone(),
        &registry,
        cfg.upstream_timeout,
    )?);

    let ledger = Arc::new(
        SheetsLedger::connect(
            &cfg.google_creds_json,
            SheetsConfig {
                spreadsheet_id: cfg.spreadsheet_id.clone(),
                sheet_name: cfg.sheet_name.clone(),
                worksheet_name: cfg.worksheet_name.clone(),
                timeout: cfg.upstream_timeout,
            },
        )
        .await?,
    );

    let telegram = TelegramMessenger::from_token(&cfg.telegram_bot_token);
    let bot = telegram.bot();
    let messenger: Arc<dyn MessagingPort> = Arc::new(telegram);

    let conversation = Arc::new(ConversationHandler::new(
        parser,
        ledger,
        registry,
        messenger.clone(),
        cfg.currency_symbol.clone(),
    ));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                shutdown.cancel();
            }
        });
    }

    exb_telegram::router::run(cfg, bot, conversation, messenger, shutdown).await
}
