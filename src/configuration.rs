use config::ConfigError;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    /// Absent means the in-memory backend
    pub database: Option<DatabaseSettings>,
    pub jwt: JwtSettings,
    pub cookie: CookieSettings,
    pub rate_limit: RateLimitSettings,
    pub password: PasswordSettings,
    pub admin: Option<AdminSettings>,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub purge_interval_seconds: u64,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }
}

/// Token signing and lifetime settings
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: String,
    pub access_token_expiry: i64,   // seconds (900 = 15 minutes)
    pub refresh_token_expiry: i64,  // seconds (604800 = 7 days)
    pub max_refresh_tokens_per_user: usize,
}

#[derive(serde::Deserialize, Clone)]
pub struct CookieSettings {
    /// Disable only for plain-HTTP development
    pub secure: bool,
    pub domain: Option<String>,
}

#[derive(serde::Deserialize, Clone)]
pub struct RateLimitSettings {
    pub max_attempts: u32,
    pub window_seconds: i64,
    pub lockout_seconds: i64,
}

#[derive(serde::Deserialize, Clone)]
pub struct PasswordSettings {
    pub hash_cost: u32,
}

/// Bootstrap administrator, created or refreshed at startup
#[derive(serde::Deserialize, Clone)]
pub struct AdminSettings {
    pub username: String,
    pub password: String,
    pub email: String,
    pub full_name: String,
}

/// Load settings: defaults, then `configuration.*` if present, then
/// `APP_`-prefixed environment variables (`APP_JWT__SECRET`, ...).
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .set_default("application.host", "127.0.0.1")?
        .set_default("application.port", 8080)?
        .set_default("application.purge_interval_seconds", 86_400)?
        .set_default("jwt.issuer", "session-guard")?
        .set_default("jwt.access_token_expiry", 900)?
        .set_default("jwt.refresh_token_expiry", 604_800)?
        .set_default("jwt.max_refresh_tokens_per_user", 5)?
        .set_default("cookie.secure", true)?
        .set_default("rate_limit.max_attempts", 5)?
        .set_default("rate_limit.window_seconds", 900)?
        .set_default("rate_limit.lockout_seconds", 1800)?
        .set_default("password.hash_cost", bcrypt::DEFAULT_COST)?
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}
