use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub gateway: Option<GatewayConfig>,
}

/// Credentials for the external payment gateway. When absent the service
/// runs against the stub gateway (dev / COD-only deployments).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let jwt_secret = env::var("JWT_SECRET")?;
        let gateway = GatewayConfig::from_env();
        Ok(Self {
            database_url,
            host,
            port,
            jwt_secret,
            gateway,
        })
    }
}

impl GatewayConfig {
    fn from_env() -> Option<Self> {
        let key_id = env::var("GATEWAY_KEY_ID").ok()?;
        let key_secret = env::var("GATEWAY_KEY_SECRET").ok()?;
        let webhook_secret = env::var("GATEWAY_WEBHOOK_SECRET").ok()?;
        let base_url = env::var("GATEWAY_BASE_URL")
            .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string());
        Some(Self {
            base_url,
            key_id,
            key_secret,
            webhook_secret,
        })
    }
}
