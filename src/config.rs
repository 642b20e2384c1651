use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub delivery: DeliveryConfig,
    pub ozonpay: OzonPayConfig,
    pub telegram: TelegramConfig,
    pub uploads_dir: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub issuer: String,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub cost: String,
    pub free_threshold: String,
}

#[derive(Debug, Clone)]
pub struct OzonPayConfig {
    pub api_url: String,
    pub access_key: String,
    pub secret_key: String,
    pub notification_secret_key: String,
    pub success_url: String,
    pub fail_url: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub bot_username: String,
    pub webhook_secret: Option<String>,
    pub request_timeout: Duration,
}

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                public_url: env::var("PUBLIC_URL")
                    .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            },
            database: DatabaseConfig {
                path: env::var("DATABASE_PATH").unwrap_or_else(|_| "verdura.db".to_string()),
                max_connections: env::var("DB_MAX_CONNS")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(5),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET")
                    .unwrap_or_else(|_| "super-secret-jwt-key-change-in-production".to_string()),
                access_token_ttl: Duration::from_secs(
                    env::var("JWT_ACCESS_TOKEN_TTL")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(24 * 60 * 60), // 24 hours
                ),
                refresh_token_ttl: Duration::from_secs(
                    env::var("JWT_REFRESH_TOKEN_TTL")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(30 * 24 * 60 * 60), // 30 days
                ),
                issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "verdura".to_string()),
            },
            delivery: DeliveryConfig {
                cost: env::var("DELIVERY_COST").unwrap_or_else(|_| "350".to_string()),
                free_threshold: env::var("DELIVERY_FREE_THRESHOLD")
                    .unwrap_or_else(|_| "5000".to_string()),
            },
            ozonpay: OzonPayConfig {
                api_url: env::var("OZONPAY_API_URL")
                    .unwrap_or_else(|_| "https://payapi.ozon.ru/v1".to_string()),
                access_key: env::var("OZONPAY_ACCESS_KEY").unwrap_or_default(),
                secret_key: env::var("OZONPAY_SECRET_KEY").unwrap_or_default(),
                notification_secret_key: env::var("OZONPAY_NOTIFICATION_SECRET_KEY")
                    .unwrap_or_default(),
                success_url: env::var("OZONPAY_SUCCESS_URL")
                    .unwrap_or_else(|_| "http://localhost:8080/payment/success".to_string()),
                fail_url: env::var("OZONPAY_FAIL_URL")
                    .unwrap_or_else(|_| "http://localhost:8080/payment/fail".to_string()),
                request_timeout: Duration::from_secs(
                    env::var("OZONPAY_TIMEOUT")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(15),
                ),
            },
            telegram: TelegramConfig {
                bot_token: env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
                bot_username: env::var("TELEGRAM_BOT_USERNAME")
                    .unwrap_or_else(|_| "verdura_bot".to_string()),
                webhook_secret: env::var("TELEGRAM_WEBHOOK_SECRET").ok(),
                request_timeout: Duration::from_secs(
                    env::var("TELEGRAM_TIMEOUT")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(10),
                ),
            },
            uploads_dir: env::var("UPLOADS_DIR").unwrap_or_else(|_| "uploads".to_string()),
        }
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.database.path)
    }

    /// Deep link the client opens to hand the verification token to the bot.
    pub fn bot_deep_link(&self, token: &str) -> String {
        format!("https://t.me/{}?start={}", self.telegram.bot_username, token)
    }
}
