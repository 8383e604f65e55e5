use std::{env, fs, net::IpAddr, path::Path, time::Duration};

use crate::{categories::CategoryRegistry, errors::Error, Result};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Typed configuration, read from the environment once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_allowed_users: Vec<i64>,

    // Language model
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,

    // Ledger
    pub google_creds_json: String,
    pub sheet_name: String,
    pub spreadsheet_id: Option<String>,
    pub worksheet_name: String,

    // HTTP surface
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_queue_capacity: usize,
    pub bind_addr: IpAddr,
    pub port: u16,

    // Behavior
    pub upstream_timeout: Duration,
    pub categories: CategoryRegistry,
    pub currency_symbol: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (the process env in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        // Required
        let telegram_bot_token = get("BOT_TOKEN")
            .or_else(|| get("TELEGRAM_BOT_TOKEN"))
            .ok_or_else(|| {
                Error::Config("BOT_TOKEN environment variable is required".to_string())
            })?;
        let openai_api_key = required(get("OPENAI_API_KEY"), "OPENAI_API_KEY")?;
        let google_creds_json = required(get("GOOGLE_CREDS_JSON"), "GOOGLE_CREDS_JSON")?;

        let telegram_allowed_users = parse_csv_i64(get("TELEGRAM_ALLOWED_USERS"))?;

        let openai_model = get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
        let openai_base_url = get("OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let sheet_name = get("SHEET_NAME").unwrap_or_else(|| "Budget".to_string());
        let spreadsheet_id = get("SPREADSHEET_ID");
        let worksheet_name = get("WORKSHEET_NAME").unwrap_or_else(|| "Expenses".to_string());

        let webhook_url = get("WEBHOOK_URL").map(|u| u.trim_end_matches('/').to_string());
        let webhook_secret = get("WEBHOOK_SECRET");
        let webhook_queue_capacity =
            parse_num::<usize>(get("WEBHOOK_QUEUE_CAPACITY"), "WEBHOOK_QUEUE_CAPACITY")?
                .unwrap_or(100)
                .max(1);

        let bind_addr = parse_num::<IpAddr>(get("BIND_ADDR"), "BIND_ADDR")?
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let port = parse_num::<u16>(get("PORT"), "PORT")?.unwrap_or(8080);

        let upstream_timeout = Duration::from_secs(
            parse_num::<u64>(get("UPSTREAM_TIMEOUT_SECS"), "UPSTREAM_TIMEOUT_SECS")?
                .unwrap_or(30)
                .max(1),
        );

        let categories = match get("EXPENSE_CATEGORIES") {
            Some(list) => CategoryRegistry::new(list.split(','))?,
            None => CategoryRegistry::default(),
        };
        let currency_symbol = get("CURRENCY_SYMBOL").unwrap_or_else(|| "₹".to_string());

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            openai_api_key,
            openai_model,
            openai_base_url,
            google_creds_json,
            sheet_name,
            spreadsheet_id,
            worksheet_name,
            webhook_url,
            webhook_secret,
            webhook_queue_capacity,
            bind_addr,
            port,
            upstream_timeout,
            categories,
            currency_symbol,
        })
    }

    /// Webhook mode is selected by the presence of a public callback URL.
    pub fn webhook_mode(&self) -> bool {
        self.webhook_url.is_some()
    }
}

fn required(value: Option<String>, key: &str) -> Result<String> {
    value.ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_num<T: std::str::FromStr>(v: Option<String>, key: &str) -> Result<Option<T>> {
    match v {
        None => Ok(None),
        Some(s) => s
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} has an invalid value: {s}"))),
    }
}

fn parse_csv_i64(v: Option<String>) -> Result<Vec<i64>> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| {
                Error::Config(format!("TELEGRAM_ALLOWED_USERS has an invalid id: {s}"))
            })
        })
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
