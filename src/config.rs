use crate::core::ConfigError;
use crate::log::{DEFAULT_GROUP_WINDOW, Logger, StdLogger};
use crate::render::{NoRenderer, Renderer};
use crate::web::Lv;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Hook invoked at the start of every request, after the incoming line.
pub type Inb4 = Arc<dyn Fn(&Lv) + Send + Sync>;

/// Application configuration bundle
#[derive(Clone)]
pub struct Config {
    /// Listen port
    pub port: u16,

    /// Production mode tightens cookie policy
    pub production: bool,

    /// Cookie domain, required in production
    pub domain: Option<String>,

    /// Relational store connection string
    pub database_url: Option<String>,

    /// Pre-request hook
    pub inb4: Option<Inb4>,

    /// Window for grouping adjacent log entries of the same severity
    pub log_group_window: Duration,

    /// Run additive schema sync for every table after the versioned migrations
    pub auto_migrate: bool,

    logger: Option<Arc<dyn Logger>>,
    renderer: Arc<dyn Renderer>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            port: 8080,
            production: false,
            domain: None,
            database_url: None,
            inb4: None,
            log_group_window: DEFAULT_GROUP_WINDOW,
            auto_migrate: false,
            logger: None,
            renderer: Arc::new(NoRenderer),
        }
    }

    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads `PORT`, `PRODUCTION`, `DOMAIN`, `DATABASE_URL`,
    /// `LOG_GROUP_WINDOW` (microseconds) and `AUTO_MIGRATE` through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::new();

        if let Some(port) = lookup("PORT") {
            config.port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                expected: "a port number",
                value: port.clone(),
            })?;
        }

        config.production = lookup("PRODUCTION").is_some_and(|value| !value.is_empty());
        config.domain = lookup("DOMAIN").filter(|value| !value.is_empty());
        config.database_url = lookup("DATABASE_URL").filter(|value| !value.is_empty());

        if let Some(window) = lookup("LOG_GROUP_WINDOW") {
            let micros: u64 = window.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "LOG_GROUP_WINDOW",
                expected: "a duration in microseconds",
                value: window.clone(),
            })?;
            config.log_group_window = Duration::from_micros(micros);
        }

        if let Some(flag) = lookup("AUTO_MIGRATE") {
            config.auto_migrate = parse_flag(&flag).ok_or(ConfigError::Invalid {
                name: "AUTO_MIGRATE",
                expected: "true or false",
                value: flag.clone(),
            })?;
        }

        Ok(config)
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn inb4(mut self, hook: impl Fn(&Lv) + Send + Sync + 'static) -> Self {
        self.inb4 = Some(Arc::new(hook));
        self
    }

    pub fn log_group_window(mut self, window: Duration) -> Self {
        self.log_group_window = window;
        self
    }

    pub fn auto_migrate(mut self, enabled: bool) -> Self {
        self.auto_migrate = enabled;
        self
    }

    pub fn logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    pub fn renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    /// The configured logger, or a stdout logger honouring `log_group_window`.
    pub fn resolve_logger(&self) -> Arc<dyn Logger> {
        match &self.logger {
            Some(logger) => Arc::clone(logger),
            None => Arc::new(StdLogger::stdout().group_window(self.log_group_window)),
        }
    }

    pub fn resolve_renderer(&self) -> Arc<dyn Renderer> {
        Arc::clone(&self.renderer)
    }

    /// Cookie domain; `localhost` when none is configured.
    pub fn cookie_domain(&self) -> &str {
        self.domain.as_deref().unwrap_or("localhost")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }

        if self.production && self.domain.is_none() {
            return Err(ConfigError::MissingDomain);
        }

        if self.log_group_window.is_zero() {
            return Err(ConfigError::ZeroLogWindow);
        }

        Ok(())
    }

    /// Database URL with the password masked, safe to print.
    pub fn redacted_database_url(&self) -> Option<String> {
        self.database_url.as_deref().map(redact_password)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("production", &self.production)
            .field("domain", &self.domain)
            .field("database_url", &self.redacted_database_url())
            .field("inb4", &self.inb4.is_some())
            .field("log_group_window", &self.log_group_window)
            .field("auto_migrate", &self.auto_migrate)
            .field("custom_logger", &self.logger.is_some())
            .finish_non_exhaustive()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn redact_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert!(!config.production);
        assert_eq!(config.log_group_window, DEFAULT_GROUP_WINDOW);
        assert_eq!(config.cookie_domain(), "localhost");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = Config::new()
            .port(3000)
            .production(true)
            .domain("example.com")
            .auto_migrate(true);

        assert_eq!(config.port, 3000);
        assert!(config.production);
        assert_eq!(config.cookie_domain(), "example.com");
        assert!(config.auto_migrate);
    }

    #[test]
    fn test_from_lookup() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("PRODUCTION", "1"),
            ("DOMAIN", "example.com"),
            ("DATABASE_URL", "postgres://app:secret@db:5432/app"),
            ("LOG_GROUP_WINDOW", "250"),
            ("AUTO_MIGRATE", "true"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9000);
        assert!(config.production);
        assert_eq!(config.domain.as_deref(), Some("example.com"));
        assert_eq!(config.log_group_window, Duration::from_micros(250));
        assert!(config.auto_migrate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_is_reported() {
        let err = Config::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "PORT",
                expected: "a port number",
                value: "eighty".into(),
            }
        );
    }

    #[test]
    fn test_validate() {
        assert_eq!(
            Config::new().production(true).validate(),
            Err(ConfigError::MissingDomain)
        );
        assert_eq!(Config::new().port(0).validate(), Err(ConfigError::ZeroPort));
        assert_eq!(
            Config::new().log_group_window(Duration::ZERO).validate(),
            Err(ConfigError::ZeroLogWindow)
        );
    }

    #[test]
    fn test_redacted_database_url() {
        let config = Config::new().database_url("postgres://app:secret@db:5432/app");
        assert_eq!(
            config.redacted_database_url().as_deref(),
            Some("postgres://app:***@db:5432/app")
        );
        assert!(!format!("{config:?}").contains("secret"));

        let config = Config::new().database_url("postgres://db/app");
        assert_eq!(config.redacted_database_url().as_deref(), Some("postgres://db/app"));
    }
}
