//! Client configuration.

use std::time::Duration;

use cas_protocol::HostAddr;

use crate::error::{Error, Result};

/// URL scheme prefix, matched case-insensitively.
pub const URL_PREFIX: &str = "cci:cubrid:";

/// Maximum number of alternate hosts.
pub const MAX_ALTERNATE_HOSTS: usize = 10;

/// Default broker port.
pub const DEFAULT_PORT: u16 = 33000;

/// Default interval after which a failed-over connection returns to the
/// primary host.
pub const DEFAULT_RC_TIME: Duration = Duration::from_secs(600);

/// Default capacity of the per-connection statement cache.
pub const DEFAULT_STATEMENT_CACHE_SIZE: usize = 256;

/// Configuration for connecting to a CAS broker.
#[derive(Clone)]
pub struct Config {
    /// Primary broker hostname or IP address.
    pub host: String,

    /// Primary broker port (default: 33000).
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Database user.
    pub user: String,

    /// Database password.
    pub password: String,

    /// Alternate brokers tried in order when the primary is unreachable.
    pub alternate_hosts: Vec<HostAddr>,

    /// Time after a failover before the next end-transaction returns the
    /// connection to the primary host.
    pub rc_time: Duration,

    /// Client autocommit mode; `None` adopts the broker's default.
    pub autocommit: Option<bool>,

    /// Login budget for connect and reconnect; `None` for no limit.
    pub login_timeout: Option<Duration>,

    /// Default query budget for new statements; `None` for no limit.
    pub query_timeout: Option<Duration>,

    /// Drop the session when a request hits its query timeout.
    pub disconnect_on_query_timeout: bool,

    /// Keep prepared statements in a per-connection cache.
    pub statement_pool: bool,

    /// Capacity of the statement cache.
    pub statement_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            alternate_hosts: Vec::new(),
            rc_time: DEFAULT_RC_TIME,
            autocommit: None,
            login_timeout: None,
            query_timeout: None,
            disconnect_on_query_timeout: false,
            statement_pool: false,
            statement_cache_size: DEFAULT_STATEMENT_CACHE_SIZE,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("alternate_hosts", &self.alternate_hosts)
            .field("rc_time", &self.rc_time)
            .field("autocommit", &self.autocommit)
            .field("login_timeout", &self.login_timeout)
            .field("query_timeout", &self.query_timeout)
            .field(
                "disconnect_on_query_timeout",
                &self.disconnect_on_query_timeout,
            )
            .field("statement_pool", &self.statement_pool)
            .finish()
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection URL.
    ///
    /// ```text
    /// cci:cubrid:host:port:db[:user[:password]][?key=value[&key=value...]]
    /// ```
    ///
    /// Recognised options: `althosts=h1:p1,h2:p2`, `rctime` (seconds),
    /// `autocommit`, `login_timeout` and `query_timeout` (milliseconds,
    /// `0` = no limit) and `disconnect_on_query_timeout`. Any other option is
    /// rejected.
    ///
    /// `user` and `password` are used only when the URL does not carry them.
    pub fn from_url(url: &str, user: &str, password: &str) -> Result<Self> {
        let head = url.get(..URL_PREFIX.len()).unwrap_or_default();
        if !head.eq_ignore_ascii_case(URL_PREFIX) {
            return Err(Error::InvalidUrl(format!("missing '{URL_PREFIX}' prefix")));
        }
        let rest = &url[URL_PREFIX.len()..];
        let (body, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut fields = body.split(':');
        let host = fields.next().unwrap_or_default().trim();
        let port = fields.next().unwrap_or_default().trim();
        let database = fields.next().unwrap_or_default().trim();
        let url_user = fields.next().unwrap_or_default();
        let url_password = fields.next().unwrap_or_default();
        if let Some(extra) = fields.find(|f| !f.is_empty()) {
            return Err(Error::InvalidUrl(format!("unexpected field '{extra}'")));
        }

        if host.is_empty() {
            return Err(Error::InvalidUrl("host is empty".into()));
        }
        if database.is_empty() {
            return Err(Error::InvalidUrl("database name is empty".into()));
        }

        let mut config = Self {
            host: host.to_string(),
            port: parse_port(port)?,
            database: database.to_string(),
            user: pick(url_user, user),
            password: pick(url_password, password),
            ..Self::default()
        };

        for option in query.split('&').filter(|o| !o.is_empty()) {
            let (key, value) = option
                .split_once('=')
                .ok_or_else(|| Error::InvalidUrl(format!("option without value: {option}")))?;
            config.apply_option(key.trim(), value.trim())?;
        }

        Ok(config)
    }

    fn apply_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key.to_ascii_lowercase().as_str() {
            "althosts" => {
                let mut hosts = Vec::new();
                for entry in value.split(',').filter(|e| !e.trim().is_empty()) {
                    let (host, port) = entry
                        .trim()
                        .rsplit_once(':')
                        .ok_or_else(|| Error::InvalidUrl(format!("invalid althost: {entry}")))?;
                    if host.is_empty() {
                        return Err(Error::InvalidUrl(format!("invalid althost: {entry}")));
                    }
                    hosts.push(HostAddr::new(host, parse_port(port)?));
                }
                if hosts.len() > MAX_ALTERNATE_HOSTS {
                    return Err(Error::InvalidUrl(format!(
                        "at most {MAX_ALTERNATE_HOSTS} alternate hosts are allowed"
                    )));
                }
                self.alternate_hosts = hosts;
            }
            "rctime" => {
                let secs: u64 = parse_number(key, value)?;
                self.rc_time = Duration::from_secs(secs);
            }
            "autocommit" => self.autocommit = Some(parse_bool(key, value)?),
            "login_timeout" => self.login_timeout = parse_millis(key, value)?,
            "query_timeout" => self.query_timeout = parse_millis(key, value)?,
            "disconnect_on_query_timeout" => {
                self.disconnect_on_query_timeout = parse_bool(key, value)?;
            }
            _ => return Err(Error::InvalidUrl(format!("unknown option: {key}"))),
        }
        Ok(())
    }

    /// Check the configuration for values a connection cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host is empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must be positive".into()));
        }
        if self.alternate_hosts.len() > MAX_ALTERNATE_HOSTS {
            return Err(Error::Config(format!(
                "at most {MAX_ALTERNATE_HOSTS} alternate hosts are allowed"
            )));
        }
        Ok(())
    }

    /// Address of the primary broker.
    #[must_use]
    pub fn primary(&self) -> HostAddr {
        HostAddr::new(self.host.clone(), self.port)
    }

    /// Set the primary host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the primary port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the user and password.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Add an alternate host.
    #[must_use]
    pub fn alternate_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.alternate_hosts.push(HostAddr::new(host, port));
        self
    }

    /// Set the failback interval.
    #[must_use]
    pub fn rc_time(mut self, rc_time: Duration) -> Self {
        self.rc_time = rc_time;
        self
    }

    /// Set the client autocommit mode.
    #[must_use]
    pub fn autocommit(mut self, enabled: bool) -> Self {
        self.autocommit = Some(enabled);
        self
    }

    /// Set the login timeout; `None` for no limit.
    #[must_use]
    pub fn login_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.login_timeout = timeout;
        self
    }

    /// Set the default query timeout; `None` for no limit.
    #[must_use]
    pub fn query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Drop the session when a request hits its query timeout.
    #[must_use]
    pub fn disconnect_on_query_timeout(mut self, enabled: bool) -> Self {
        self.disconnect_on_query_timeout = enabled;
        self
    }

    /// Enable the per-connection statement cache.
    #[must_use]
    pub fn statement_pool(mut self, enabled: bool) -> Self {
        self.statement_pool = enabled;
        self
    }

    /// Set the statement cache capacity.
    #[must_use]
    pub fn statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }
}

fn pick(from_url: &str, fallback: &str) -> String {
    if from_url.is_empty() {
        fallback.to_string()
    } else {
        from_url.to_string()
    }
}

fn parse_port(text: &str) -> Result<u16> {
    match text.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(Error::InvalidUrl(format!("invalid port: '{text}'"))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidUrl(format!("invalid value for {key}: '{value}'")))
}

/// Parse a millisecond timeout where `0` means no limit.
pub(crate) fn parse_millis(key: &str, value: &str) -> Result<Option<Duration>> {
    let millis: u64 = parse_number(key, value)?;
    Ok((millis > 0).then(|| Duration::from_millis(millis)))
}

pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" => Ok(true),
        "false" | "off" | "no" => Ok(false),
        _ => Err(Error::InvalidUrl(format!("invalid boolean for {key}: '{value}'"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_url_with_options() {
        let config = Config::from_url(
            "cci:cubrid:host:1523:demodb:user:pass:?login_timeout=500&autocommit=false",
            "",
            "",
        )
        .unwrap();

        assert_eq!(config.host, "host");
        assert_eq!(config.port, 1523);
        assert_eq!(config.database, "demodb");
        assert_eq!(config.user, "user");
        assert_eq!(config.password, "pass");
        assert_eq!(config.login_timeout, Some(Duration::from_millis(500)));
        assert_eq!(config.autocommit, Some(false));
        assert!(config.alternate_hosts.is_empty());
    }

    #[test]
    fn test_url_unknown_option() {
        let err = Config::from_url("cci:cubrid:host:1523:demodb:::?unknownopt=1", "", "")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
        assert_eq!(err.code(), -20030);
    }

    #[test]
    fn test_url_credentials_fallback() {
        let config = Config::from_url("CCI:CUBRID:localhost:33000:demodb:::", "dba", "secret")
            .unwrap();
        assert_eq!(config.user, "dba");
        assert_eq!(config.password, "secret");

        let config =
            Config::from_url("cci:cubrid:localhost:33000:demodb:public::", "dba", "secret")
                .unwrap();
        assert_eq!(config.user, "public");
        assert_eq!(config.password, "secret");
    }

    #[test]
    fn test_url_althosts_and_rctime() {
        let config = Config::from_url(
            "cci:cubrid:db1:33000:demodb:::?althosts=db2:33001,db3:33002&rctime=30",
            "",
            "",
        )
        .unwrap();
        assert_eq!(
            config.alternate_hosts,
            vec![HostAddr::new("db2", 33001), HostAddr::new("db3", 33002)]
        );
        assert_eq!(config.rc_time, Duration::from_secs(30));
    }

    #[test]
    fn test_url_zero_timeout_means_unlimited() {
        let config =
            Config::from_url("cci:cubrid:h:1:db:::?query_timeout=0&login_timeout=0", "", "")
                .unwrap();
        assert_eq!(config.query_timeout, None);
        assert_eq!(config.login_timeout, None);
    }

    #[test]
    fn test_url_rejects_malformed() {
        for url in [
            "jdbc:cubrid:h:1:db",
            "cci:cubrid::33000:db",
            "cci:cubrid:h:0:db",
            "cci:cubrid:h:port:db",
            "cci:cubrid:h:33000:",
            "cci:cubrid:h:33000:db:u:p:extra",
            "cci:cubrid:h:33000:db?autocommit=maybe",
            "cci:cubrid:h:33000:db?rctime=-1",
            "cci:cubrid:h:33000:db?althosts=nohost",
            "cci:cubrid:h:33000:db?login_timeout",
        ] {
            assert!(
                matches!(Config::from_url(url, "", ""), Err(Error::InvalidUrl(_))),
                "accepted {url}"
            );
        }
    }

    #[test]
    fn test_too_many_alternate_hosts() {
        let hosts: Vec<String> = (0..=MAX_ALTERNATE_HOSTS).map(|i| format!("h{i}:1")).collect();
        let url = format!("cci:cubrid:h:1:db?althosts={}", hosts.join(","));
        assert!(Config::from_url(&url, "", "").is_err());
    }

    #[test]
    fn test_builder_fluent() {
        let config = Config::new()
            .host("db1")
            .port(30000)
            .database("demodb")
            .credentials("dba", "")
            .alternate_host("db2", 30000)
            .statement_pool(true)
            .query_timeout(Some(Duration::from_secs(5)));

        assert_eq!(config.primary(), HostAddr::new("db1", 30000));
        assert_eq!(config.alternate_hosts.len(), 1);
        assert!(config.statement_pool);
        assert!(config.validate().is_ok());
        assert!(!format!("{config:?}").contains("secret"));
    }

    proptest! {
        #[test]
        fn prop_url_components_round_trip(
            host in "[a-z][a-z0-9.-]{0,20}",
            port in 1u16..,
            db in "[a-z][a-z0-9_]{0,15}",
            login in 0u64..100_000,
        ) {
            let url = format!("cci:cubrid:{host}:{port}:{db}:::?login_timeout={login}");
            let config = Config::from_url(&url, "dba", "").unwrap();
            prop_assert_eq!(config.host, host);
            prop_assert_eq!(config.port, port);
            prop_assert_eq!(config.database, db);
            prop_assert_eq!(config.login_timeout.map(|d| d.as_millis() as u64).unwrap_or(0), login);
        }
    }
}
