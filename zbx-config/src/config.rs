use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zbx_log::{Level, LogConfig};

use crate::aggregator::AggregatorConfig;

/// Defines the origin of a config error.
#[derive(Debug, Default)]
enum ConfigErrorOrigin {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override or a validated field.
    Field(&'static str),
}

impl fmt::Display for ConfigErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorOrigin::None => Ok(()),
            ConfigErrorOrigin::File(file_name) => write!(f, " (file {})", file_name.display()),
            ConfigErrorOrigin::Field(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug, thiserror::Error)]
#[error("{kind}{origin}")]
pub struct ConfigError {
    kind: ConfigErrorKind,
    origin: ConfigErrorOrigin,
    #[source]
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            kind,
            origin: ConfigErrorOrigin::None,
            cause: None,
        }
    }

    #[inline]
    fn wrap<E>(cause: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            kind,
            origin: ConfigErrorOrigin::None,
            cause: Some(Box::new(cause)),
        }
    }

    #[inline]
    fn for_field<E>(cause: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(cause, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.origin = ConfigErrorOrigin::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.origin = ConfigErrorOrigin::Field(name);
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Parsing or dumping YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config")]
    BadJson,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

/// Loads a YAML document of type `T` from a file.
fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let f = fs::File::open(path)
        .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;

    serde_yaml::from_reader(io::BufReader::new(f))
        .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(path))
}

/// Structure used to hold information about configuration overrides via CLI parameters.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The host the relay should bind to (network interface).
    pub host: Option<String>,
    /// The UDP port to listen on for datagrams.
    pub port: Option<String>,
    /// The host name of the Zabbix trapper.
    pub zabbix_host: Option<String>,
    /// The port of the Zabbix trapper.
    pub zabbix_port: Option<String>,
    /// The flush interval in milliseconds.
    pub flush_interval: Option<String>,
    /// The percentile reported for timers.
    pub percentile_threshold: Option<String>,
    /// The log level.
    pub log_level: Option<String>,
    /// The shutdown timeout in seconds.
    pub shutdown_timeout: Option<String>,
}

/// Settings of the UDP listener.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Relay {
    /// The address or host name of the interface the relay binds to.
    host: String,
    /// The UDP port to listen on.
    port: u16,
    /// The size of the receive buffer. Longer datagrams are truncated.
    buffer_size: usize,
}

impl Default for Relay {
    fn default() -> Self {
        Relay {
            host: "0.0.0.0".to_owned(),
            port: 8126,
            buffer_size: 1024,
        }
    }
}

/// The Zabbix trapper that receives flushed values.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Zabbix {
    /// Host name or address of the trapper.
    host: String,
    /// Port of the trapper.
    port: u16,
    /// Maximum number of seconds for one exchange with the trapper, including connecting.
    timeout: u64,
    /// Maximum size of a response payload in bytes.
    max_response_size: u64,
}

impl Default for Zabbix {
    fn default() -> Self {
        Zabbix {
            host: "localhost".to_owned(),
            port: 10051,
            timeout: 10,
            max_response_size: 1024 * 1024,
        }
    }
}

/// Control the metrics.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Metrics {
    /// Hostname and port of the statsd server.
    ///
    /// Defaults to `None`.
    statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    ///
    /// Defaults to `"zbx.relay"`.
    prefix: String,
    /// Default tags to apply to all metrics.
    default_tags: BTreeMap<String, String>,
    /// Global sample rate for all emitted metrics between `0.0` and `1.0`.
    ///
    /// Defaults to `1.0` (100%).
    sample_rate: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "zbx.relay".into(),
            default_tags: BTreeMap::new(),
            sample_rate: 1.0,
        }
    }
}

/// Controls various limits.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Limits {
    /// The maximum number of seconds to wait for services to stop after receiving a shutdown
    /// signal.
    shutdown_timeout: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            shutdown_timeout: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    relay: Relay,
    #[serde(default)]
    zabbix: Zabbix,
    #[serde(default)]
    aggregator: AggregatorConfig,
    #[serde(default)]
    logging: LogConfig,
    #[serde(default)]
    metrics: Metrics,
    #[serde(default)]
    limits: Limits,
}

impl ConfigValues {
    /// The file name of the configuration within the config folder.
    const FILE_NAME: &'static str = "config.yml";

    fn path(base: &Path) -> PathBuf {
        base.join(Self::FILE_NAME)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(field) = self.aggregator.invalid_field() {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field(field));
        }

        if self.relay.host.is_empty() {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("relay.host"));
        }

        if self.relay.buffer_size == 0 {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("relay.buffer_size"));
        }

        if self.zabbix.timeout == 0 {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("zabbix.timeout"));
        }

        if !(0.0..=1.0).contains(&self.metrics.sample_rate) {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("metrics.sample_rate"));
        }

        Ok(())
    }
}

/// Config struct.
#[derive(Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    ///
    /// The folder must contain a `config.yml` file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let values: ConfigValues = load_yaml(&ConfigValues::path(&path))?;
        values.validate()?;

        Ok(Config { values, path })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let values: ConfigValues = serde_json::from_value(value)
            .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?;
        values.validate()?;

        Ok(Config {
            values,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. command line
    /// parameters).
    pub fn apply_override(&mut self, overrides: OverridableConfig) -> Result<&mut Self, ConfigError> {
        let relay = &mut self.values.relay;

        if let Some(host) = overrides.host {
            relay.host = host;
        }

        if let Some(port) = overrides.port {
            relay.port = port
                .parse()
                .map_err(|err| ConfigError::for_field(err, "port"))?;
        }

        let zabbix = &mut self.values.zabbix;

        if let Some(zabbix_host) = overrides.zabbix_host {
            zabbix.host = zabbix_host;
        }

        if let Some(zabbix_port) = overrides.zabbix_port {
            zabbix.port = zabbix_port
                .parse()
                .map_err(|err| ConfigError::for_field(err, "zabbix_port"))?;
        }

        let aggregator = &mut self.values.aggregator;

        if let Some(flush_interval) = overrides.flush_interval {
            aggregator.flush_interval = flush_interval
                .parse()
                .map_err(|err| ConfigError::for_field(err, "flush_interval"))?;
        }

        if let Some(percentile_threshold) = overrides.percentile_threshold {
            aggregator.percentile_threshold = percentile_threshold
                .parse()
                .map_err(|err| ConfigError::for_field(err, "percentile_threshold"))?;
        }

        if let Some(log_level) = overrides.log_level {
            self.values.logging.level = log_level
                .parse::<Level>()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        if let Some(shutdown_timeout) = overrides.shutdown_timeout {
            self.values.limits.shutdown_timeout = shutdown_timeout
                .parse()
                .map_err(|err| ConfigError::for_field(err, "shutdown_timeout"))?;
        }

        self.values.validate()?;
        Ok(self)
    }

    /// Checks if the config file exists in the given folder.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Returns the path of the config folder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))
    }

    /// Returns the host to listen on for datagrams.
    ///
    /// This is either an IP address or a host name, which is resolved when binding.
    pub fn listen_host(&self) -> &str {
        &self.values.relay.host
    }

    /// Returns the UDP port to listen on for datagrams.
    pub fn listen_port(&self) -> u16 {
        self.values.relay.port
    }

    /// Returns the size of the datagram receive buffer.
    pub fn recv_buffer_size(&self) -> usize {
        self.values.relay.buffer_size
    }

    /// Returns the host name of the Zabbix trapper.
    pub fn zabbix_host(&self) -> &str {
        &self.values.zabbix.host
    }

    /// Returns the port of the Zabbix trapper.
    pub fn zabbix_port(&self) -> u16 {
        self.values.zabbix.port
    }

    /// Returns the timeout for one exchange with the Zabbix trapper.
    pub fn zabbix_timeout(&self) -> Duration {
        Duration::from_secs(self.values.zabbix.timeout)
    }

    /// Returns the maximum size of a response payload from the Zabbix trapper.
    pub fn zabbix_max_response_size(&self) -> u64 {
        self.values.zabbix.max_response_size
    }

    /// Returns the aggregator configuration.
    pub fn aggregator_config(&self) -> &AggregatorConfig {
        &self.values.aggregator
    }

    /// Returns the interval between two flushes.
    pub fn flush_interval(&self) -> Duration {
        self.values.aggregator.flush_interval()
    }

    /// Returns the percentile reported for timers.
    pub fn percentile_threshold(&self) -> u8 {
        self.values.aggregator.percentile_threshold
    }

    /// Returns `true` if aggregated values are flushed during graceful shutdown.
    pub fn flush_on_shutdown(&self) -> bool {
        self.values.aggregator.flush_on_shutdown
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the socket addresses for statsd.
    ///
    /// If stats are disabled, an empty vector is returned.
    pub fn statsd_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        if let Some(ref addr) = self.values.metrics.statsd {
            let addrs = addr
                .as_str()
                .to_socket_addrs()
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::InvalidValue).field("statsd"))?
                .collect();
            Ok(addrs)
        } else {
            Ok(vec![])
        }
    }

    /// Return the prefix for statsd metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags for statsd metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the global sample rate for statsd metrics.
    pub fn metrics_sample_rate(&self) -> f64 {
        self.values.metrics.sample_rate
    }

    /// Returns the maximum time to wait for services to stop during shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.limits.shutdown_timeout)
    }
}
