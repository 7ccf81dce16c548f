use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub gateway_provider: String,
    pub khalti_secret_key: String,
    pub khalti_base_url: String,
    pub mailgun_api_key: String,
    pub mailgun_domain: String,
    pub mail_from: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "stayline.db".to_string()),
            gateway_provider: env::var("GATEWAY_PROVIDER").unwrap_or_else(|_| "noop".to_string()),
            khalti_secret_key: env::var("KHALTI_SECRET_KEY").unwrap_or_default(),
            khalti_base_url: env::var("KHALTI_BASE_URL")
                .unwrap_or_else(|_| "https://khalti.com/api/v2".to_string()),
            mailgun_api_key: env::var("MAILGUN_API_KEY").unwrap_or_default(),
            mailgun_domain: env::var("MAILGUN_DOMAIN").unwrap_or_default(),
            mail_from: env::var("MAIL_FROM")
                .unwrap_or_else(|_| "bookings@stayline.local".to_string()),
        }
    }
}
