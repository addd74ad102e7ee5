//! Configuration surface: on-disk JSON file, validated/resolved [`Conf`],
//! and a [`ConfHandle`] generalized from a similar hot-reloadable handle
//! (`Arc<RwLock<Arc<Conf>>>` plus a `Notify` for change signaling).

use std::sync::Arc;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::krb5::cache::CredCacheLocation;

/// The raw, on-disk shape of the configuration file.
pub mod dto {
    use super::{Deserialize, Serialize, Utf8PathBuf};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ConfFile {
        /// Path to the keyring file (`Keyring`).
        pub keyring: Utf8PathBuf,
        /// Path to the service keytab (`Keytab`), used by the Kerberos adapter.
        pub keytab: Utf8PathBuf,
        /// The WebKDC's own Kerberos service principal, the single entry serviced
        /// clients authenticate their `getTokensRequest` AP-REQs against.
        pub principal: String,
        /// Freshness window for login/request tokens (`TokenMaxTTL`). Defaults to `5m`.
        #[serde(default = "default_token_max_ttl")]
        pub token_max_ttl: String,
        /// Expiration delta for newly minted service tokens (`ServiceTokenLifetime`).
        /// Mandatory, no default.
        pub service_token_lifetime: String,
        /// Upper bound on webkdc-proxy expiration (`ProxyTokenMaxLifetime`). `0` (the
        /// default) means TGT-bound only, i.e. no additional cap.
        #[serde(default = "default_proxy_token_max_lifetime")]
        pub proxy_token_max_lifetime: String,
        /// Verbose logging (`Debug`).
        #[serde(default)]
        pub debug: bool,
        /// Directory (file-cache mode) or `KEYRING:<name>` (kernel session-keyring
        /// mode) for the relying-party credential cache (`CredCacheDir`).
        pub cred_cache_dir: String,
        /// Address the HTTP front door binds to.
        #[serde(default = "default_listen_address")]
        pub listen_address: String,
        /// Rotation interval for the keyring's auto-update policy. Defaults to 30 days.
        #[serde(default = "default_key_lifetime")]
        pub key_lifetime: String,
        /// Path (or directory) for rolling log files. Ambient, like `listen_address`.
        #[serde(default = "default_log_file")]
        pub log_file: Utf8PathBuf,
        /// Extra `tracing` env-filter directives layered on top of the built-in
        /// level (e.g. `webkdc::handler=trace`), applied only when `debug` is set.
        #[serde(default)]
        pub log_directive: Option<String>,
    }

    fn default_token_max_ttl() -> String {
        "5m".to_owned()
    }

    fn default_proxy_token_max_lifetime() -> String {
        "0s".to_owned()
    }

    fn default_listen_address() -> String {
        "127.0.0.1:8080".to_owned()
    }

    fn default_key_lifetime() -> String {
        "30d".to_owned()
    }

    fn default_log_file() -> Utf8PathBuf {
        Utf8PathBuf::from("/var/log/webkdc/webkdc.log")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid duration `{0}`: expected a number followed by s/m/h/d/w")]
    BadDuration(String),
    #[error("`cred_cache_dir` must be a filesystem path or `KEYRING:<name>`, got `{0}`")]
    BadCredCacheDir(String),
}

/// Parses a duration: a non-negative integer followed by one of the
/// suffixes `s`, `m`, `h`, `d`, `w`. Hand-rolled rather than pulled in from
/// `humantime`, since the accepted suffix set isn't `humantime`'s default anyway.
pub fn parse_duration(s: &str) -> Result<std::time::Duration, ConfigError> {
    let s = s.trim();
    let (digits, suffix) = s.split_at(s.len().saturating_sub(1));
    let multiplier = match suffix {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        "w" => 60 * 60 * 24 * 7,
        _ => return Err(ConfigError::BadDuration(s.to_owned())),
    };
    let amount: u64 = digits.parse().map_err(|_| ConfigError::BadDuration(s.to_owned()))?;
    Ok(std::time::Duration::from_secs(amount * multiplier))
}

/// Resolved, validated configuration — what request handling actually reads.
#[derive(Debug, Clone)]
pub struct Conf {
    pub keyring_path: Utf8PathBuf,
    pub keytab_path: Utf8PathBuf,
    pub principal: String,
    pub token_max_ttl: std::time::Duration,
    pub service_token_lifetime: std::time::Duration,
    /// `None` means "no cap beyond the TGT's own expiration" (`ProxyTokenMaxLifetime = 0`).
    pub proxy_token_max_lifetime: Option<std::time::Duration>,
    pub debug: bool,
    pub cred_cache: CredCacheLocation,
    pub listen_address: String,
    pub key_lifetime: std::time::Duration,
    pub log_file: Utf8PathBuf,
    pub log_directive: Option<String>,
}

impl Conf {
    pub fn from_conf_file(conf_file: &dto::ConfFile) -> anyhow::Result<Self> {
        let token_max_ttl = parse_duration(&conf_file.token_max_ttl).context("token_max_ttl")?;
        let service_token_lifetime =
            parse_duration(&conf_file.service_token_lifetime).context("service_token_lifetime")?;
        let proxy_token_max_lifetime_raw =
            parse_duration(&conf_file.proxy_token_max_lifetime).context("proxy_token_max_lifetime")?;
        let proxy_token_max_lifetime = (!proxy_token_max_lifetime_raw.is_zero()).then_some(proxy_token_max_lifetime_raw);
        let key_lifetime = parse_duration(&conf_file.key_lifetime).context("key_lifetime")?;

        let cred_cache = if let Some(name) = conf_file.cred_cache_dir.strip_prefix("KEYRING:") {
            CredCacheLocation::Keyring { name: name.to_owned() }
        } else if conf_file.cred_cache_dir.is_empty() {
            return Err(ConfigError::BadCredCacheDir(conf_file.cred_cache_dir.clone()).into());
        } else {
            CredCacheLocation::Directory(Utf8PathBuf::from(&conf_file.cred_cache_dir))
        };

        Ok(Self {
            keyring_path: conf_file.keyring.clone(),
            keytab_path: conf_file.keytab.clone(),
            principal: conf_file.principal.clone(),
            token_max_ttl,
            service_token_lifetime,
            proxy_token_max_lifetime,
            debug: conf_file.debug,
            cred_cache,
            listen_address: conf_file.listen_address.clone(),
            key_lifetime,
            log_file: conf_file.log_file.clone(),
            log_directive: conf_file.log_directive.clone(),
        })
    }
}

/// Configuration handle: source of truth for current configuration state, shared
/// copy-on-write across request handlers.
#[derive(Clone)]
pub struct ConfHandle {
    inner: Arc<ConfHandleInner>,
}

struct ConfHandleInner {
    conf: parking_lot::RwLock<Arc<Conf>>,
    conf_file: parking_lot::RwLock<Arc<dto::ConfFile>>,
    changed: Notify,
}

impl ConfHandle {
    pub fn from_conf_file(conf_file: dto::ConfFile) -> anyhow::Result<Self> {
        let conf = Conf::from_conf_file(&conf_file).context("invalid configuration file")?;
        Ok(Self {
            inner: Arc::new(ConfHandleInner {
                conf: parking_lot::RwLock::new(Arc::new(conf)),
                conf_file: parking_lot::RwLock::new(Arc::new(conf_file)),
                changed: Notify::new(),
            }),
        })
    }

    pub fn load(path: &Utf8Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading config file at {path}"))?;
        let conf_file: dto::ConfFile = serde_json::from_str(&raw).context("parsing config file as JSON")?;
        Self::from_conf_file(conf_file)
    }

    /// Returns the current configuration snapshot (do not hold it forever, as it may
    /// become outdated after a reload).
    pub fn get_conf(&self) -> Arc<Conf> {
        self.inner.conf.read().clone()
    }

    pub fn get_conf_file(&self) -> Arc<dto::ConfFile> {
        self.inner.conf_file.read().clone()
    }

    pub async fn change_notified(&self) {
        self.inner.changed.notified().await;
    }

    /// Atomically replaces the in-memory configuration with a freshly validated one.
    pub fn reload(&self, conf_file: dto::ConfFile) -> anyhow::Result<()> {
        let conf = Conf::from_conf_file(&conf_file).context("invalid configuration file")?;
        *self.inner.conf.write() = Arc::new(conf);
        *self.inner.conf_file.write() = Arc::new(conf_file);
        self.inner.changed.notify_waiters();
        Ok(())
    }
}

impl core::fmt::Debug for ConfHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConfHandle").finish_non_exhaustive()
    }
}
