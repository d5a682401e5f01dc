// Monitor configuration
//
// YAML-backed settings plus the swap-only snapshot handle shared by the scanner,
// the watcher and the HTTP server.

use crate::constants::{
    DEFAULT_BIND_ADDRESS, DEFAULT_CACHE_FILE, DEFAULT_CERT_DIR, DEFAULT_EXPIRY_THRESHOLD_DAYS,
    DEFAULT_NUM_WORKERS, DEFAULT_PORT, MAX_EXPIRY_THRESHOLD_DAYS, MAX_NUM_WORKERS,
};
use crate::error::{CertWatchError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Main monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub cert_dirs: Vec<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub port: u16,
    pub bind_address: String,
    pub num_workers: usize,
    pub dry_run: bool,
    pub expiry_threshold_days: u32,
    pub clear_cache_on_reload: bool,
    pub enable_weak_crypto_metrics: bool,
    pub cache_file: Option<PathBuf>,
    /// Serve the HTTP endpoints over TLS when both files are set
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
    /// Export process CPU, memory and file descriptor metrics
    pub enable_runtime_metrics: bool,

    /// File this snapshot was loaded from, if any
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cert_dirs: vec![PathBuf::from(DEFAULT_CERT_DIR)],
            log_file: None,
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            num_workers: DEFAULT_NUM_WORKERS,
            dry_run: false,
            expiry_threshold_days: DEFAULT_EXPIRY_THRESHOLD_DAYS,
            clear_cache_on_reload: false,
            enable_weak_crypto_metrics: false,
            cache_file: Some(PathBuf::from(DEFAULT_CACHE_FILE)),
            tls_cert_file: None,
            tls_key_file: None,
            enable_runtime_metrics: false,
            config_file: None,
        }
    }
}

impl MonitorConfig {
    /// Load and validate configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::parse_file(path.as_ref())?;
        config.validate().map_err(|e| {
            CertWatchError::config(format!(
                "invalid configuration in {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        tracing::info!(
            config_file = %path.as_ref().display(),
            cert_dirs = config.cert_dirs.len(),
            port = config.port,
            workers = config.num_workers,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Parse a YAML file on top of the defaults without validating it
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| CertWatchError::io(path, e))?;

        let mut config = Self::from_yaml(&contents)?;
        config.config_file = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse YAML text; missing keys keep their defaults
    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Check every setting, creating the log and cache parent directories if needed
    pub fn validate(&self) -> Result<()> {
        if self.cert_dirs.is_empty() {
            return Err(CertWatchError::config("no certificate directories specified"));
        }

        for (i, dir) in self.cert_dirs.iter().enumerate() {
            if dir.as_os_str().is_empty() {
                return Err(CertWatchError::config(format!(
                    "certificate directory {} is empty",
                    i
                )));
            }

            let meta = fs::metadata(dir).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CertWatchError::config(format!(
                        "certificate directory does not exist: {}",
                        dir.display()
                    ))
                } else {
                    CertWatchError::io(dir, e)
                }
            })?;

            if !meta.is_dir() {
                return Err(CertWatchError::config(format!(
                    "certificate path is not a directory: {}",
                    dir.display()
                )));
            }

            fs::read_dir(dir).map_err(|e| CertWatchError::io(dir, e))?;
        }

        if self.port == 0 {
            return Err(CertWatchError::config(
                "port number 0 is out of valid range (1-65535)",
            ));
        }

        if self.num_workers < 1 {
            return Err(CertWatchError::config(format!(
                "number of workers must be at least 1, got {}",
                self.num_workers
            )));
        }
        if self.num_workers > MAX_NUM_WORKERS {
            return Err(CertWatchError::config(format!(
                "number of workers {} exceeds the maximum of {}",
                self.num_workers, MAX_NUM_WORKERS
            )));
        }

        if self.expiry_threshold_days < 1 || self.expiry_threshold_days > MAX_EXPIRY_THRESHOLD_DAYS
        {
            return Err(CertWatchError::config(format!(
                "expiry threshold days must be between 1 and {}, got {}",
                MAX_EXPIRY_THRESHOLD_DAYS, self.expiry_threshold_days
            )));
        }

        self.validate_tls()?;

        if let Some(log_file) = self.log_file() {
            ensure_parent_dir(log_file)?;
        }
        if let Some(cache_file) = self.cache_path() {
            ensure_parent_dir(cache_file)?;
        }

        Ok(())
    }

    fn validate_tls(&self) -> Result<()> {
        let cert = non_empty(self.tls_cert_file.as_deref());
        let key = non_empty(self.tls_key_file.as_deref());

        match (cert, key) {
            (None, None) => Ok(()),
            (None, Some(_)) => Err(CertWatchError::config(
                "TLS certificate file must be specified when TLS key file is provided",
            )),
            (Some(_), None) => Err(CertWatchError::config(
                "TLS key file must be specified when TLS certificate file is provided",
            )),
            (Some(cert), Some(key)) => {
                for (what, file) in [("certificate", cert), ("key", key)] {
                    fs::metadata(file).map_err(|e| {
                        CertWatchError::config(format!(
                            "cannot access TLS {} file {}: {}",
                            what,
                            file.display(),
                            e
                        ))
                    })?;
                }
                Ok(())
            }
        }
    }

    /// Apply overrides from environment variables.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`. Booleans only turn on when the value is
    /// `true` (any case); unparseable numbers are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dirs) = lookup("CERT_DIRS") {
            let dirs: Vec<PathBuf> = dirs
                .split(':')
                .filter(|d| !d.is_empty())
                .map(PathBuf::from)
                .collect();
            if !dirs.is_empty() {
                self.cert_dirs = dirs;
            }
        }
        if let Some(log_file) = lookup("LOG_FILE") {
            self.log_file = Some(PathBuf::from(log_file));
        }
        if let Some(port) = lookup("PORT").and_then(|v| v.trim().parse().ok()) {
            self.port = port;
        }
        if let Some(bind) = lookup("BIND_ADDRESS") {
            self.bind_address = bind;
        }
        if let Some(workers) = lookup("NUM_WORKERS").and_then(|v| v.trim().parse().ok()) {
            self.num_workers = workers;
        }
        if env_flag(&lookup, "DRY_RUN") {
            self.dry_run = true;
        }
        if let Some(days) = lookup("EXPIRY_THRESHOLD_DAYS").and_then(|v| v.trim().parse().ok()) {
            self.expiry_threshold_days = days;
        }
        if env_flag(&lookup, "CLEAR_CACHE_ON_RELOAD") {
            self.clear_cache_on_reload = true;
        }
        if env_flag(&lookup, "ENABLE_WEAK_CRYPTO_METRICS") {
            self.enable_weak_crypto_metrics = true;
        }
        if let Some(cache_file) = lookup("CACHE_FILE") {
            self.cache_file = Some(PathBuf::from(cache_file));
        }
        if let Some(cert) = lookup("TLS_CERT_FILE").filter(|v| !v.is_empty()) {
            self.tls_cert_file = Some(PathBuf::from(cert));
        }
        if let Some(key) = lookup("TLS_KEY_FILE").filter(|v| !v.is_empty()) {
            self.tls_key_file = Some(PathBuf::from(key));
        }
        if env_flag(&lookup, "ENABLE_RUNTIME_METRICS") {
            self.enable_runtime_metrics = true;
        }
    }

    /// Log file path, treating an empty value as unset
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Cache file path, treating an empty value as "no persistence"
    pub fn cache_path(&self) -> Option<&Path> {
        self.cache_file
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Certificate and key for HTTPS, only when both are set
    pub fn tls_files(&self) -> Option<(&Path, &Path)> {
        non_empty(self.tls_cert_file.as_deref()).zip(non_empty(self.tls_key_file.as_deref()))
    }

    /// Socket address string for the HTTP server
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

fn env_flag<F>(lookup: &F, key: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn ensure_parent_dir(file: &Path) -> Result<()> {
    match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && dir != Path::new(".") => {
            fs::create_dir_all(dir).map_err(|e| CertWatchError::io(dir, e))
        }
        _ => Ok(()),
    }
}

/// Shared, swap-only view of the current configuration.
///
/// Readers get an `Arc` snapshot that never changes underneath them; `set` and
/// `reload` replace the snapshot wholesale.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<MonitorConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current snapshot
    pub fn get(&self) -> Arc<MonitorConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the snapshot
    pub fn set(&self, config: MonitorConfig) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }

    /// Re-read the file the current snapshot came from.
    ///
    /// On any failure the current snapshot stays in place.
    pub fn reload(&self) -> Result<Arc<MonitorConfig>> {
        let current = self.get();
        let path = current
            .config_file
            .clone()
            .ok_or_else(|| CertWatchError::config("no configuration file to reload"))?;

        let mut fresh = MonitorConfig::from_file(&path)?;
        // Runtime-only switch, the file cannot turn dry-run mode on or off.
        fresh.dry_run = current.dry_run;

        let fresh = Arc::new(fresh);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = fresh.clone();
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn valid_config(dir: &TempDir) -> MonitorConfig {
        MonitorConfig {
            cert_dirs: vec![dir.path().to_path_buf()],
            cache_file: Some(dir.path().join("state/cache.json")),
            ..MonitorConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.cert_dirs, vec![PathBuf::from("./certs")]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.expiry_threshold_days, 45);
        assert!(!config.dry_run);
        assert!(!config.enable_weak_crypto_metrics);
        assert_eq!(config.listen_address(), "0.0.0.0:3000");
    }

    #[test]
    fn test_yaml_partial_keeps_defaults() {
        let yaml = "cert_dirs:\n  - /etc/ssl/a\n  - /etc/ssl/b\nport: 9102\n";
        let config = MonitorConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.cert_dirs.len(), 2);
        assert_eq!(config.port, 9102);
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.expiry_threshold_days, 45);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(MonitorConfig::from_yaml("").unwrap(), MonitorConfig::default());
    }

    #[test]
    fn test_empty_cache_file_disables_persistence() {
        let config = MonitorConfig::from_yaml("cache_file: \"\"\n").unwrap();
        assert!(config.cache_path().is_none());
    }

    #[test]
    fn test_validate_accepts_good_config() {
        let dir = TempDir::new().unwrap();
        let config = valid_config(&dir);
        assert!(config.validate().is_ok());
        assert!(dir.path().join("state").is_dir());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let dir = TempDir::new().unwrap();

        let mut config = valid_config(&dir);
        config.cert_dirs.clear();
        assert!(config.validate().is_err());

        let mut config = valid_config(&dir);
        config.cert_dirs = vec![dir.path().join("missing")];
        assert!(config.validate().is_err());

        let file = dir.path().join("file.pem");
        fs::write(&file, b"x").unwrap();
        let mut config = valid_config(&dir);
        config.cert_dirs = vec![file];
        assert!(config.validate().is_err());

        let mut config = valid_config(&dir);
        config.port = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config(&dir);
        config.num_workers = 0;
        assert!(config.validate().is_err());
        config.num_workers = 101;
        assert!(config.validate().is_err());

        let mut config = valid_config(&dir);
        config.expiry_threshold_days = 0;
        assert!(config.validate().is_err());
        config.expiry_threshold_days = 366;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_tls_pairing() {
        let dir = TempDir::new().unwrap();
        let cert = dir.path().join("server.crt");
        let key = dir.path().join("server.key");
        fs::write(&cert, b"cert").unwrap();
        fs::write(&key, b"key").unwrap();

        let mut config = valid_config(&dir);
        config.tls_key_file = Some(key.clone());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("TLS certificate file must be specified"));

        let mut config = valid_config(&dir);
        config.tls_cert_file = Some(cert.clone());
        config.tls_key_file = Some(PathBuf::new());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("TLS key file must be specified"));
        assert!(config.tls_files().is_none());

        let mut config = valid_config(&dir);
        config.tls_cert_file = Some(cert.clone());
        config.tls_key_file = Some(dir.path().join("missing.key"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cannot access TLS key file"));

        let mut config = valid_config(&dir);
        config.tls_cert_file = Some(cert.clone());
        config.tls_key_file = Some(key.clone());
        assert!(config.validate().is_ok());
        assert_eq!(config.tls_files(), Some((cert.as_path(), key.as_path())));
    }

    #[test]
    fn test_yaml_tls_and_runtime_metrics() {
        let yaml = "tls_cert_file: /etc/certwatch/tls.crt\ntls_key_file: /etc/certwatch/tls.key\nenable_runtime_metrics: true\n";
        let config = MonitorConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.tls_cert_file.as_deref(),
            Some(Path::new("/etc/certwatch/tls.crt"))
        );
        assert!(config.tls_files().is_some());
        assert!(config.enable_runtime_metrics);
        assert!(!MonitorConfig::default().enable_runtime_metrics);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = MonitorConfig::default();
        config.apply_env_overrides(lookup_from(&[
            ("CERT_DIRS", "/a:/b::/c"),
            ("PORT", "9000"),
            ("NUM_WORKERS", "eight"),
            ("DRY_RUN", "TRUE"),
            ("CLEAR_CACHE_ON_RELOAD", "yes"),
            ("ENABLE_WEAK_CRYPTO_METRICS", "true"),
            ("EXPIRY_THRESHOLD_DAYS", "30"),
            ("TLS_CERT_FILE", "/tls/cert.pem"),
            ("TLS_KEY_FILE", ""),
            ("ENABLE_RUNTIME_METRICS", "True"),
        ]));

        assert_eq!(
            config.cert_dirs,
            vec![
                PathBuf::from("/a"),
                PathBuf::from("/b"),
                PathBuf::from("/c")
            ]
        );
        assert_eq!(config.port, 9000);
        assert_eq!(config.num_workers, 4);
        assert!(config.dry_run);
        assert!(!config.clear_cache_on_reload);
        assert!(config.enable_weak_crypto_metrics);
        assert_eq!(config.expiry_threshold_days, 30);
        assert_eq!(config.tls_cert_file, Some(PathBuf::from("/tls/cert.pem")));
        assert!(config.tls_key_file.is_none());
        assert!(config.enable_runtime_metrics);
    }

    #[test]
    fn test_from_file_records_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            format!(
                "cert_dirs:\n  - {}\ncache_file: {}\nnum_workers: 2\n",
                dir.path().display(),
                dir.path().join("cache.json").display()
            ),
        )
        .unwrap();

        let config = MonitorConfig::from_file(&path).unwrap();
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.config_file.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_from_file_missing() {
        let err = MonitorConfig::from_file("/nonexistent/certwatch.yaml").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_handle_reload_keeps_snapshot_on_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let body = |workers: usize| {
            format!(
                "cert_dirs:\n  - {}\ncache_file: {}\nnum_workers: {}\n",
                dir.path().display(),
                dir.path().join("cache.json").display(),
                workers
            )
        };
        fs::write(&path, body(2)).unwrap();

        let handle = ConfigHandle::new(MonitorConfig::from_file(&path).unwrap());
        let before = handle.get();

        fs::write(&path, body(6)).unwrap();
        let reloaded = handle.reload().unwrap();
        assert_eq!(reloaded.num_workers, 6);
        assert_eq!(handle.get().num_workers, 6);
        // Earlier snapshots are never mutated.
        assert_eq!(before.num_workers, 2);

        fs::write(&path, body(0)).unwrap();
        assert!(handle.reload().is_err());
        assert_eq!(handle.get().num_workers, 6);
    }

    #[test]
    fn test_reload_without_file_fails() {
        let handle = ConfigHandle::new(MonitorConfig::default());
        assert!(handle.reload().is_err());
    }
}
