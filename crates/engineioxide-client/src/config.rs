use http::HeaderMap;
use url::Url;

/// Configuration of an engine.io [`Socket`](crate::Socket).
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Use `https`/`wss`.
    /// Defaults to false.
    pub secure: bool,

    /// The server host name.
    /// Defaults to "localhost".
    pub hostname: String,

    /// The server port.
    /// Defaults to 80.
    pub port: u16,

    /// The path engine.io requests are sent to.
    /// Defaults to "/engine.io".
    pub path: String,

    /// Extra query parameters sent with every request.
    pub query: Vec<(String, String)>,

    /// Transports to try, in order. Unknown names are dropped when the socket opens.
    /// Defaults to `["polling", "websocket"]`.
    pub transports: Vec<String>,

    /// Probe and upgrade to the better transports offered by the server.
    /// Defaults to true.
    pub upgrade: bool,

    /// Connect directly with websocket if the previous connection upgraded to it.
    /// Defaults to false.
    pub remember_upgrade: bool,

    /// Always encode binary data as base64 text.
    /// Defaults to false.
    pub force_base64: bool,

    /// Refuse upgrades that would lose binary support.
    /// Defaults to false.
    pub only_binary_upgrades: bool,

    /// Name of the cache busting query parameter.
    /// Defaults to "t".
    pub timestamp_param: String,

    /// Add the cache busting parameter to requests. `None` adds it to polling requests only.
    /// Defaults to `None`.
    pub timestamp_requests: Option<bool>,

    /// Headers added to every polling request.
    pub extra_headers: HeaderMap,

    /// Websocket sub protocols.
    pub protocols: Vec<String>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            secure: false,
            hostname: "localhost".to_string(),
            port: 80,
            path: "/engine.io".to_string(),
            query: Vec::new(),
            transports: vec!["polling".to_string(), "websocket".to_string()],
            upgrade: true,
            remember_upgrade: false,
            force_base64: false,
            only_binary_upgrades: false,
            timestamp_param: "t".to_string(),
            timestamp_requests: None,
            extra_headers: HeaderMap::new(),
            protocols: Vec::new(),
        }
    }
}

impl SocketConfig {
    /// Create a new builder with a default config
    pub fn builder() -> SocketConfigBuilder {
        SocketConfigBuilder::new()
    }

    /// A config targeting `url`: scheme, host, port and query are taken from it.
    pub fn from_url(url: &Url) -> Self {
        let mut config = Self::default();
        config.set_url(url);
        config
    }

    fn set_url(&mut self, url: &Url) {
        self.secure = matches!(url.scheme(), "https" | "wss");
        if let Some(host) = url.host_str() {
            self.hostname = host.trim_start_matches('[').trim_end_matches(']').to_string();
        }
        self.port = url
            .port()
            .unwrap_or(if self.secure { 443 } else { 80 });
        self.query.extend(url.query_pairs().into_owned());
    }

    /// The request path, always ending with a `/`.
    pub fn normalized_path(&self) -> String {
        format!("{}/", self.path.trim_end_matches('/'))
    }
}

/// Builder for [`SocketConfig`].
#[derive(Debug, Default)]
pub struct SocketConfigBuilder {
    config: SocketConfig,
}

impl SocketConfigBuilder {
    /// Create a new builder with a default config
    pub fn new() -> Self {
        Self::default()
    }

    /// Target `url`: scheme, host, port and query are taken from it.
    pub fn url(mut self, url: &Url) -> Self {
        self.config.set_url(url);
        self
    }

    /// The path engine.io requests are sent to.
    /// Defaults to "/engine.io".
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Add a query parameter sent with every request.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.query.push((key.into(), value.into()));
        self
    }

    /// Transports to try, in order.
    /// Defaults to `["polling", "websocket"]`.
    pub fn transports<I, S>(mut self, transports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.transports = transports.into_iter().map(Into::into).collect();
        self
    }

    /// Probe and upgrade to the better transports offered by the server.
    /// Defaults to true.
    pub fn upgrade(mut self, upgrade: bool) -> Self {
        self.config.upgrade = upgrade;
        self
    }

    /// Connect directly with websocket if the previous connection upgraded to it.
    /// Defaults to false.
    pub fn remember_upgrade(mut self, remember_upgrade: bool) -> Self {
        self.config.remember_upgrade = remember_upgrade;
        self
    }

    /// Always encode binary data as base64 text.
    /// Defaults to false.
    pub fn force_base64(mut self, force_base64: bool) -> Self {
        self.config.force_base64 = force_base64;
        self
    }

    /// Refuse upgrades that would lose binary support.
    /// Defaults to false.
    pub fn only_binary_upgrades(mut self, only_binary_upgrades: bool) -> Self {
        self.config.only_binary_upgrades = only_binary_upgrades;
        self
    }

    /// Add the cache busting parameter to every request, or to none.
    pub fn timestamp_requests(mut self, timestamp_requests: bool) -> Self {
        self.config.timestamp_requests = Some(timestamp_requests);
        self
    }

    /// Name of the cache busting query parameter.
    /// Defaults to "t".
    pub fn timestamp_param(mut self, timestamp_param: impl Into<String>) -> Self {
        self.config.timestamp_param = timestamp_param.into();
        self
    }

    /// Headers added to every polling request.
    pub fn extra_headers(mut self, extra_headers: HeaderMap) -> Self {
        self.config.extra_headers = extra_headers;
        self
    }

    /// Websocket sub protocols.
    pub fn protocols(mut self, protocols: Vec<String>) -> Self {
        self.config.protocols = protocols;
        self
    }

    /// Build the config
    pub fn build(self) -> SocketConfig {
        self.config
    }
}
