use std::time::Duration;

use engineioxide_client::SocketConfig;
use url::Url;

/// Configuration of a [`Manager`](crate::Manager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// The path socket.io requests are sent to.
    /// Defaults to "/socket.io".
    pub path: String,

    /// Reconnect automatically when the connection is lost or cannot be established.
    /// Defaults to true.
    pub reconnection: bool,

    /// How many reconnection attempts are made before giving up.
    /// Defaults to unbounded.
    pub reconnection_attempts: u32,

    /// The delay before the first reconnection attempt, doubled at each attempt.
    /// Defaults to 1000ms.
    pub reconnection_delay: Duration,

    /// The maximum delay between two reconnection attempts.
    /// Defaults to 5000ms.
    pub reconnection_delay_max: Duration,

    /// The jitter applied to the reconnection delay, between 0 and 1.
    /// Defaults to 0.5.
    pub randomization_factor: f64,

    /// How long a connection attempt may take. `None` waits forever.
    /// Defaults to 20s.
    pub timeout: Option<Duration>,

    /// Open the connection as soon as a namespace socket is created.
    /// Defaults to true.
    pub auto_connect: bool,

    /// Query appended to the connect packet of every namespace, e.g `token=abc`.
    pub query: Option<String>,

    /// Always create a new manager instead of reusing a cached one.
    /// Defaults to false.
    pub force_new: bool,

    /// Share one manager between the namespaces of a same server.
    /// Defaults to true.
    pub multiplex: bool,

    /// The engine.io configuration. Its path is overridden by [`ManagerConfig::path`] and its
    /// target by the uri given to the manager.
    pub engine: SocketConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            path: "/socket.io".to_string(),
            reconnection: true,
            reconnection_attempts: u32::MAX,
            reconnection_delay: Duration::from_millis(1000),
            reconnection_delay_max: Duration::from_millis(5000),
            randomization_factor: 0.5,
            timeout: Some(Duration::from_millis(20000)),
            auto_connect: true,
            query: None,
            force_new: false,
            multiplex: true,
            engine: SocketConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Create a new builder with a default config
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::new()
    }

    /// The engine.io config of a connection to `url`.
    pub(crate) fn engine_config(&self, url: &Url) -> SocketConfig {
        let mut config = self.engine.clone();
        let target = SocketConfig::from_url(url);
        config.secure = target.secure;
        config.hostname = target.hostname;
        config.port = target.port;
        config.query.extend(target.query);
        config.path = self.path.clone();
        config
    }
}

/// Builder for [`ManagerConfig`].
#[derive(Debug, Default)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    /// Create a new builder with a default config
    pub fn new() -> Self {
        Self::default()
    }

    /// The path socket.io requests are sent to.
    /// Defaults to "/socket.io".
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Reconnect automatically when the connection is lost or cannot be established.
    /// Defaults to true.
    pub fn reconnection(mut self, reconnection: bool) -> Self {
        self.config.reconnection = reconnection;
        self
    }

    /// How many reconnection attempts are made before giving up.
    /// Defaults to unbounded.
    pub fn reconnection_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnection_attempts = attempts;
        self
    }

    /// The delay before the first reconnection attempt.
    /// Defaults to 1000ms.
    pub fn reconnection_delay(mut self, delay: Duration) -> Self {
        self.config.reconnection_delay = delay;
        self
    }

    /// The maximum delay between two reconnection attempts.
    /// Defaults to 5000ms.
    pub fn reconnection_delay_max(mut self, delay: Duration) -> Self {
        self.config.reconnection_delay_max = delay;
        self
    }

    /// The jitter applied to the reconnection delay, between 0 and 1.
    /// Defaults to 0.5.
    pub fn randomization_factor(mut self, factor: f64) -> Self {
        self.config.randomization_factor = factor;
        self
    }

    /// How long a connection attempt may take. `None` waits forever.
    /// Defaults to 20s.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Open the connection as soon as a namespace socket is created.
    /// Defaults to true.
    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.config.auto_connect = auto_connect;
        self
    }

    /// Query appended to the connect packet of every namespace.
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.config.query = Some(query.into());
        self
    }

    /// Always create a new manager instead of reusing a cached one.
    /// Defaults to false.
    pub fn force_new(mut self, force_new: bool) -> Self {
        self.config.force_new = force_new;
        self
    }

    /// Share one manager between the namespaces of a same server.
    /// Defaults to true.
    pub fn multiplex(mut self, multiplex: bool) -> Self {
        self.config.multiplex = multiplex;
        self
    }

    /// The engine.io configuration.
    pub fn engine(mut self, engine: SocketConfig) -> Self {
        self.config.engine = engine;
        self
    }

    /// Build the config
    pub fn build(self) -> ManagerConfig {
        self.config
    }
}
