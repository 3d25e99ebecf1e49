use std::str::FromStr;
use std::time::Duration;

use chaindesk_core::chain::DEFAULT_STRIKES_AROUND_ATM;
use chaindesk_tws::TwsConfig;
use chrono::NaiveDate;

/// Per-contract requests the feed keeps outstanding against the broker.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;

/// Gap between per-contract request starts. TWS accepts about 50 messages a
/// second per client.
pub const DEFAULT_REQUEST_SPACING_MS: u64 = 50;

/// Seconds between WebSocket ping frames.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Which [`Broker`](chaindesk_core::broker::Broker) backs the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerMode {
    /// Live TWS session over the socket API.
    Tws,
    /// In-memory broker with generated quotes.
    Simulated,
}

impl FromStr for BrokerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tws" | "live" => Ok(BrokerMode::Tws),
            "simulated" | "sim" => Ok(BrokerMode::Simulated),
            other => Err(format!("unknown broker mode '{other}'")),
        }
    }
}

/// Market-data feed settings.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Underlying whose 0DTE chain is tracked (default: `SPY`).
    pub symbol: String,
    /// Delay between refresh cycles (default: 1000 ms).
    pub refresh_interval: Duration,
    /// Strikes kept on each side of the ATM strike (default: `10`).
    pub strikes_around_atm: usize,
    /// Fixed expiry date. `None` means today's local date.
    pub expiry_date: Option<NaiveDate>,
    /// Serve a generated chain while no live data has arrived yet.
    pub mock_fallback: bool,
    /// Most per-contract broker requests outstanding at once (default: `10`).
    pub max_in_flight: usize,
    /// Minimum gap between the starts of consecutive per-contract requests
    /// (default: 50 ms). Zero disables pacing.
    pub request_spacing: Duration,
}

impl FeedConfig {
    /// Expiry to track on the current cycle.
    pub fn target_expiry(&self) -> NaiveDate {
        self.expiry_date
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbol: "SPY".into(),
            refresh_interval: Duration::from_millis(1000),
            strikes_around_atm: DEFAULT_STRIKES_AROUND_ATM,
            expiry_date: None,
            mock_fallback: false,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            request_spacing: Duration::from_millis(DEFAULT_REQUEST_SPACING_MS),
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local TWS on the same machine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `127.0.0.1`).
    pub host: String,
    /// Bind port (default: `5000`).
    pub port: u16,
    /// Allowed CORS origins. Comma-separated `CORS_ORIGINS`, falling back
    /// to `FRONTEND_URL`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    pub broker_mode: BrokerMode,
    /// Underlying price used by the simulated broker (default: `500.0`).
    pub simulated_price: f64,
    /// Interval between WebSocket pings (default: 30 s).
    pub heartbeat_interval: Duration,
    pub feed: FeedConfig,
    pub tws: TwsConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                   |
    /// |---------------------------|---------------------------|
    /// | `HOST`                    | `127.0.0.1`               |
    /// | `PORT`                    | `5000`                    |
    /// | `CORS_ORIGINS`            | `FRONTEND_URL`            |
    /// | `FRONTEND_URL`            | `http://localhost:3000`   |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                      |
    /// | `BROKER_MODE`             | `tws`                     |
    /// | `SIMULATED_PRICE`         | `500.0`                   |
    /// | `UNDERLYING_SYMBOL`       | `SPY`                     |
    /// | `REFRESH_RATE_MS`         | `1000`                    |
    /// | `STRIKES_AROUND_ATM`      | `10`                      |
    /// | `EXPIRY_DATE`             | unset (today)             |
    /// | `MOCK_DATA_FALLBACK`      | `false`                   |
    /// | `FEED_MAX_IN_FLIGHT`      | `10`                      |
    /// | `FEED_REQUEST_SPACING_MS` | `50`                      |
    /// | `HEARTBEAT_INTERVAL_SECS` | `30`                      |
    ///
    /// TWS connection variables are read by [`TwsConfig::from_env`].
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "5000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".into());
        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or(frontend_url)
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let broker_mode: BrokerMode = std::env::var("BROKER_MODE")
            .unwrap_or_else(|_| "tws".into())
            .parse()
            .expect("BROKER_MODE must be 'tws' or 'simulated'");

        let simulated_price: f64 = std::env::var("SIMULATED_PRICE")
            .unwrap_or_else(|_| "500.0".into())
            .parse()
            .expect("SIMULATED_PRICE must be a number");

        let symbol = std::env::var("UNDERLYING_SYMBOL").unwrap_or_else(|_| "SPY".into());

        let refresh_rate_ms: u64 = std::env::var("REFRESH_RATE_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("REFRESH_RATE_MS must be a valid u64");

        let strikes_around_atm: usize = std::env::var("STRIKES_AROUND_ATM")
            .unwrap_or_else(|_| DEFAULT_STRIKES_AROUND_ATM.to_string())
            .parse()
            .expect("STRIKES_AROUND_ATM must be a valid usize");

        let expiry_date = std::env::var("EXPIRY_DATE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_expiry_date(&s).expect("EXPIRY_DATE must be YYYY-MM-DD or YYYYMMDD"));

        let mock_fallback: bool = std::env::var("MOCK_DATA_FALLBACK")
            .unwrap_or_else(|_| "false".into())
            .parse()
            .expect("MOCK_DATA_FALLBACK must be true or false");

        let max_in_flight: usize = std::env::var("FEED_MAX_IN_FLIGHT")
            .unwrap_or_else(|_| DEFAULT_MAX_IN_FLIGHT.to_string())
            .parse()
            .expect("FEED_MAX_IN_FLIGHT must be a valid usize");

        let request_spacing_ms: u64 = std::env::var("FEED_REQUEST_SPACING_MS")
            .unwrap_or_else(|_| DEFAULT_REQUEST_SPACING_MS.to_string())
            .parse()
            .expect("FEED_REQUEST_SPACING_MS must be a valid u64");

        let heartbeat_interval_secs: u64 = std::env::var("HEARTBEAT_INTERVAL_SECS")
            .unwrap_or_else(|_| DEFAULT_HEARTBEAT_INTERVAL_SECS.to_string())
            .parse()
            .expect("HEARTBEAT_INTERVAL_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            broker_mode,
            simulated_price,
            heartbeat_interval: Duration::from_secs(heartbeat_interval_secs.max(1)),
            feed: FeedConfig {
                symbol,
                refresh_interval: Duration::from_millis(refresh_rate_ms.max(1)),
                strikes_around_atm,
                expiry_date,
                mock_fallback,
                max_in_flight: max_in_flight.max(1),
                request_spacing: Duration::from_millis(request_spacing_ms),
            },
            tws: TwsConfig::from_env(),
        }
    }
}

/// Accepts `2025-05-14` and `20250514`.
pub fn parse_expiry_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .ok()
}
