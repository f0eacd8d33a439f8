use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Covers the HTTP and TCP bind addresses, the broker capacity bounds,
/// discovery/federation and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub http: HttpSettings,
    pub tcp: TcpSettings,
    pub broker: BrokerSettings,
    pub discovery: DiscoverySettings,
    pub log: LogSettings,
}

/// Bind address for the HTTP transport.
#[derive(Debug, Deserialize, Clone)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
}

/// Bind addresses for the two TCP listeners.
#[derive(Debug, Deserialize, Clone)]
pub struct TcpSettings {
    pub publish_addr: String,
    pub subscribe_addr: String,
}

/// Engine bounds: `capacity` limits both the topic count and the subscribers
/// per topic; `queue_depth` is the per-subscription message buffer.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub capacity: usize,
    pub queue_depth: usize,
}

/// Peer discovery. When disabled the node never federates. `advertise` is the
/// endpoint announced to peers; when unset it is derived from the HTTP bind
/// address.
#[derive(Debug, Deserialize, Clone)]
pub struct DiscoverySettings {
    pub enabled: bool,
    pub port: u16,
    pub advertise: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub http: Option<PartialHttpSettings>,
    pub tcp: Option<PartialTcpSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub discovery: Option<PartialDiscoverySettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialHttpSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialTcpSettings {
    pub publish_addr: Option<String>,
    pub subscribe_addr: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub capacity: Option<usize>,
    pub queue_depth: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialDiscoverySettings {
    pub enabled: Option<bool>,
    pub port: Option<u16>,
    pub advertise: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            http: HttpSettings {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            tcp: TcpSettings {
                publish_addr: "0.0.0.0:9000".to_string(),
                subscribe_addr: "0.0.0.0:9001".to_string(),
            },
            broker: BrokerSettings {
                capacity: 100,
                queue_depth: 32,
            },
            discovery: DiscoverySettings {
                enabled: false,
                port: 8829,
                advertise: None,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Merges partially specified settings over the defaults.
    pub fn from_partial(partial: PartialSettings) -> Self {
        let default = Settings::default();

        Settings {
            http: HttpSettings {
                host: partial
                    .http
                    .as_ref()
                    .and_then(|h| h.host.clone())
                    .unwrap_or(default.http.host),
                port: partial
                    .http
                    .as_ref()
                    .and_then(|h| h.port)
                    .unwrap_or(default.http.port),
            },
            tcp: TcpSettings {
                publish_addr: partial
                    .tcp
                    .as_ref()
                    .and_then(|t| t.publish_addr.clone())
                    .unwrap_or(default.tcp.publish_addr),
                subscribe_addr: partial
                    .tcp
                    .as_ref()
                    .and_then(|t| t.subscribe_addr.clone())
                    .unwrap_or(default.tcp.subscribe_addr),
            },
            broker: BrokerSettings {
                capacity: partial
                    .broker
                    .as_ref()
                    .and_then(|b| b.capacity)
                    .unwrap_or(default.broker.capacity),
                queue_depth: partial
                    .broker
                    .as_ref()
                    .and_then(|b| b.queue_depth)
                    .unwrap_or(default.broker.queue_depth),
            },
            discovery: DiscoverySettings {
                enabled: partial
                    .discovery
                    .as_ref()
                    .and_then(|d| d.enabled)
                    .unwrap_or(default.discovery.enabled),
                port: partial
                    .discovery
                    .as_ref()
                    .and_then(|d| d.port)
                    .unwrap_or(default.discovery.port),
                advertise: partial
                    .discovery
                    .as_ref()
                    .and_then(|d| d.advertise.clone()),
            },
            log: LogSettings {
                level: partial
                    .log
                    .as_ref()
                    .and_then(|l| l.level.clone())
                    .unwrap_or(default.log.level),
            },
        }
    }
}
