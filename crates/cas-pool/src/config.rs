//! Datasource configuration.

use std::time::Duration;

use cas_client::Config;

use crate::error::PoolError;

/// Default number of connections opened by a datasource.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Default time a borrower waits for an idle connection.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(1000);

/// Property keys understood by [`PoolConfig::from_properties`].
pub mod keys {
    /// Database user (required).
    pub const USER: &str = "user";
    /// Database password.
    pub const PASSWORD: &str = "password";
    /// Connection URL (required).
    pub const URL: &str = "url";
    /// Number of connections.
    pub const POOL_SIZE: &str = "pool_size";
    /// Borrow wait in milliseconds.
    pub const MAX_WAIT: &str = "max_wait";
    /// Enable the per-connection statement cache.
    pub const USING_STMT_POOL: &str = "using_stmt_pool";
    /// Login timeout in milliseconds, merged into the URL.
    pub const LOGIN_TIMEOUT: &str = "login_timeout";
    /// Query timeout in milliseconds, merged into the URL.
    pub const QUERY_TIMEOUT: &str = "query_timeout";
    /// Drop the session on query timeout, merged into the URL.
    pub const DISCONNECT_ON_QUERY_TIMEOUT: &str = "disconnect_on_query_timeout";
}

/// Configuration for a [`Datasource`](crate::Datasource).
#[derive(Clone)]
pub struct PoolConfig {
    /// Connection URL, `cci:cubrid:host:port:db[:user[:password]][?options]`.
    pub url: String,

    /// Database user.
    pub user: String,

    /// Database password.
    pub password: String,

    /// Number of connections opened up front (default: 10).
    pub pool_size: usize,

    /// How long [`borrow`](crate::Datasource::borrow) waits for an idle
    /// connection (default: 1s). Zero fails immediately.
    pub max_wait: Duration,

    /// Keep prepared statements cached per connection across borrows.
    pub using_stmt_pool: bool,

    /// Login timeout appended to the URL options.
    pub login_timeout: Option<Duration>,

    /// Query timeout appended to the URL options.
    pub query_timeout: Option<Duration>,

    /// `disconnect_on_query_timeout` appended to the URL options.
    pub disconnect_on_query_timeout: Option<bool>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: String::new(),
            password: String::new(),
            pool_size: DEFAULT_POOL_SIZE,
            max_wait: DEFAULT_MAX_WAIT,
            using_stmt_pool: false,
            login_timeout: None,
            query_timeout: None,
            disconnect_on_query_timeout: None,
        }
    }
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("pool_size", &self.pool_size)
            .field("max_wait", &self.max_wait)
            .field("using_stmt_pool", &self.using_stmt_pool)
            .field("login_timeout", &self.login_timeout)
            .field("query_timeout", &self.query_timeout)
            .field(
                "disconnect_on_query_timeout",
                &self.disconnect_on_query_timeout,
            )
            .finish()
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from a property bag.
    ///
    /// `user` and `url` are required and `password` may be absent. Integer
    /// values must parse; booleans accept `true`, `yes`, `false` and `no` in
    /// any case. Keys not listed in [`keys`] are ignored.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        let mut user = None;
        let mut url = None;

        for (key, value) in properties {
            let value = value.as_ref();
            match key.as_ref() {
                keys::USER => user = Some(value.to_string()),
                keys::PASSWORD => config.password = value.to_string(),
                keys::URL => url = Some(value.to_string()),
                keys::POOL_SIZE => config.pool_size = parse_int(keys::POOL_SIZE, value)?,
                keys::MAX_WAIT => {
                    config.max_wait = Duration::from_millis(parse_int(keys::MAX_WAIT, value)?);
                }
                keys::USING_STMT_POOL => {
                    config.using_stmt_pool = parse_bool(keys::USING_STMT_POOL, value)?;
                }
                keys::LOGIN_TIMEOUT => {
                    config.login_timeout =
                        Some(Duration::from_millis(parse_int(keys::LOGIN_TIMEOUT, value)?));
                }
                keys::QUERY_TIMEOUT => {
                    config.query_timeout =
                        Some(Duration::from_millis(parse_int(keys::QUERY_TIMEOUT, value)?));
                }
                keys::DISCONNECT_ON_QUERY_TIMEOUT => {
                    config.disconnect_on_query_timeout =
                        Some(parse_bool(keys::DISCONNECT_ON_QUERY_TIMEOUT, value)?);
                }
                other => tracing::debug!(key = other, "ignoring unknown datasource property"),
            }
        }

        config.user = user.ok_or(PoolError::MissingProperty(keys::USER))?;
        config.url = url.ok_or(PoolError::MissingProperty(keys::URL))?;
        Ok(config)
    }

    /// Set the connection URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the number of connections.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the borrow wait.
    #[must_use]
    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }

    /// Enable or disable the statement cache.
    #[must_use]
    pub fn using_stmt_pool(mut self, enabled: bool) -> Self {
        self.using_stmt_pool = enabled;
        self
    }

    /// Set the login timeout.
    #[must_use]
    pub fn login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = Some(timeout);
        self
    }

    /// Set the query timeout.
    #[must_use]
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Drop sessions whose request hits the query timeout.
    #[must_use]
    pub fn disconnect_on_query_timeout(mut self, enabled: bool) -> Self {
        self.disconnect_on_query_timeout = Some(enabled);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.user.is_empty() {
            return Err(PoolError::MissingProperty(keys::USER));
        }
        if self.url.is_empty() {
            return Err(PoolError::MissingProperty(keys::URL));
        }
        if self.pool_size == 0 {
            return Err(PoolError::InvalidProperty {
                key: keys::POOL_SIZE,
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// The URL with the timeout properties appended as options.
    #[must_use]
    pub fn connection_url(&self) -> String {
        let mut url = self.url.clone();
        let mut delim = if url.contains('?') { '&' } else { '?' };
        let mut append = |key: &str, value: String| {
            url.push(delim);
            url.push_str(key);
            url.push('=');
            url.push_str(&value);
            delim = '&';
        };

        if let Some(timeout) = self.login_timeout {
            append(keys::LOGIN_TIMEOUT, timeout.as_millis().to_string());
        }
        if let Some(timeout) = self.query_timeout {
            append(keys::QUERY_TIMEOUT, timeout.as_millis().to_string());
        }
        if let Some(enabled) = self.disconnect_on_query_timeout {
            append(keys::DISCONNECT_ON_QUERY_TIMEOUT, enabled.to_string());
        }
        url
    }

    /// The client configuration every pooled connection is opened with.
    pub fn client_config(&self) -> Result<Config, PoolError> {
        let config = Config::from_url(&self.connection_url(), &self.user, &self.password)?;
        Ok(config.statement_pool(self.using_stmt_pool))
    }
}

fn parse_int<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, PoolError> {
    value.trim().parse().map_err(|_| PoolError::InvalidProperty {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, PoolError> {
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("no") {
        Ok(false)
    } else {
        Err(PoolError::InvalidProperty {
            key,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const URL: &str = "cci:cubrid:localhost:33000:demodb:::";

    #[test]
    fn test_defaults() {
        let config = PoolConfig::from_properties([("user", "dba"), ("url", URL)]).unwrap();
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.max_wait, DEFAULT_MAX_WAIT);
        assert!(!config.using_stmt_pool);
        assert_eq!(config.password, "");
        assert_eq!(config.connection_url(), URL);
    }

    #[test]
    fn test_required_properties() {
        let err = PoolConfig::from_properties([("url", URL)]).unwrap_err();
        assert!(matches!(err, PoolError::MissingProperty("user")));

        let err = PoolConfig::from_properties([("user", "dba")]).unwrap_err();
        assert!(matches!(err, PoolError::MissingProperty("url")));
    }

    #[test]
    fn test_integer_properties_must_parse() {
        let err = PoolConfig::from_properties([("user", "dba"), ("url", URL), ("pool_size", "ten")])
            .unwrap_err();
        assert!(matches!(err, PoolError::InvalidProperty { key: "pool_size", .. }));

        let err = PoolConfig::from_properties([("user", "dba"), ("url", URL), ("max_wait", "-1")])
            .unwrap_err();
        assert!(matches!(err, PoolError::InvalidProperty { key: "max_wait", .. }));
    }

    #[test]
    fn test_boolean_spellings() {
        for (value, expected) in [("TRUE", true), ("yes", true), ("False", false), ("NO", false)] {
            let config = PoolConfig::from_properties([
                ("user", "dba"),
                ("url", URL),
                ("using_stmt_pool", value),
            ])
            .unwrap();
            assert_eq!(config.using_stmt_pool, expected);
        }

        let err = PoolConfig::from_properties([
            ("user", "dba"),
            ("url", URL),
            ("using_stmt_pool", "on"),
        ])
        .unwrap_err();
        assert!(matches!(err, PoolError::InvalidProperty { key: "using_stmt_pool", .. }));
    }

    #[test]
    fn test_timeouts_merged_into_url() {
        let config = PoolConfig::from_properties([
            ("user", "dba"),
            ("url", URL),
            ("login_timeout", "500"),
            ("query_timeout", "2000"),
            ("disconnect_on_query_timeout", "yes"),
        ])
        .unwrap();
        assert_eq!(
            config.connection_url(),
            format!("{URL}?login_timeout=500&query_timeout=2000&disconnect_on_query_timeout=true")
        );

        let client = config.client_config().unwrap();
        assert_eq!(client.login_timeout, Some(Duration::from_millis(500)));
        assert_eq!(client.query_timeout, Some(Duration::from_millis(2000)));
        assert!(client.disconnect_on_query_timeout);
    }

    #[test]
    fn test_url_with_options_appends_with_ampersand() {
        let config = PoolConfig::new()
            .url(format!("{URL}?autocommit=false"))
            .credentials("dba", "")
            .login_timeout(Duration::from_millis(100));
        assert_eq!(
            config.connection_url(),
            format!("{URL}?autocommit=false&login_timeout=100")
        );
        let client = config.client_config().unwrap();
        assert_eq!(client.autocommit, Some(false));
    }

    #[test]
    fn test_validate() {
        assert!(PoolConfig::new().validate().is_err());
        let config = PoolConfig::new().url(URL).credentials("dba", "").pool_size(0);
        assert!(matches!(
            config.validate(),
            Err(PoolError::InvalidProperty { key: "pool_size", .. })
        ));
        assert!(config.pool_size(3).validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = PoolConfig::new().credentials("dba", "secret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("REDACTED"));
    }
}
