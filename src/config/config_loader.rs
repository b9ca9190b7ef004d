use anyhow::{Ok, Result};

use super::config_model::{AuthSecret, Billing, Database, DotEnvyConfig, Server, Stripe};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let server = Server {
        port: std::env::var("SERVER_PORT")
            .expect("SERVER_PORT is invalid")
            .parse()?,
        body_limit: std::env::var("SERVER_BODY_LIMIT")
            .expect("SERVER_BODY_LIMIT is invalid")
            .parse()?,
        timeout: std::env::var("SERVER_TIMEOUT")
            .expect("SERVER_TIMEOUT is invalid")
            .parse()?,
    };

    let database = Database {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL is invalid"),
    };

    let stripe = Stripe {
        secret_key: std::env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY is invalid"),
        webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
            .expect("STRIPE_WEBHOOK_SECRET is invalid"),
        price_id: std::env::var("STRIPE_PRICE_ID").expect("STRIPE_PRICE_ID is invalid"),
        success_url: std::env::var("CHECKOUT_SUCCESS_URL")
            .expect("CHECKOUT_SUCCESS_URL is invalid"),
        cancel_url: std::env::var("CHECKOUT_CANCEL_URL").expect("CHECKOUT_CANCEL_URL is invalid"),
        api_timeout_secs: std::env::var("STRIPE_API_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?,
    };

    let billing = Billing {
        checkout_reuse_window_minutes: std::env::var("CHECKOUT_REUSE_WINDOW_MINUTES")
            .unwrap_or_else(|_| "30".to_string())
            .parse()?,
        content_redirect: std::env::var("CONTENT_REDIRECT")
            .unwrap_or_else(|_| "/dashboard".to_string()),
        status_redirect: std::env::var("BILLING_STATUS_REDIRECT")
            .unwrap_or_else(|_| "/billing/status".to_string()),
    };

    Ok(DotEnvyConfig {
        server,
        database,
        stripe,
        billing,
    })
}

pub fn get_auth_secret() -> Result<AuthSecret> {
    dotenvy::dotenv().ok();

    Ok(AuthSecret {
        jwt_secret: std::env::var("JWT_SECRET").expect("JWT_SECRET is invalid"),
    })
}
