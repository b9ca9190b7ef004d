#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub server: Server,
    pub database: Database,
    pub stripe: Stripe,
    pub billing: Billing,
}

#[derive(Debug, Clone)]
pub struct Server {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct AuthSecret {
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub struct Stripe {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    pub api_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Billing {
    /// Trailing window (minutes) within which an open checkout flow is reused
    /// instead of minting a new one.
    pub checkout_reuse_window_minutes: i64,
    pub content_redirect: String,
    pub status_redirect: String,
}
