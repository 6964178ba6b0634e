//! Contains the system configuration.
//!
//! The configuration is loaded from **config/settings.yml**. We observe this file for changes and
//! reload it once a change is detected. Components which can follow a change during operation
//! (like the [Server](crate::server::Server) which rebinds its socket) attach themselves to the
//! [Config::notifier](Config::notifier). Store settings (database path, counter backend, ranking
//! strategy) are only read at install time.
//!
//! A complete config looks like this (all values shown are the defaults):
//! ```yaml
//! server:
//!     host: 0.0.0.0
//!     port: 8080
//!     # Maximal number of requests being processed in parallel.
//!     workers: 16
//! database:
//!     path: tally.db
//!     # Defaults to the number of CPUs.
//!     pool_size: 8
//!     # Optional directory containing candidates.csv and users.csv
//!     seed_dir: seed
//! counters:
//!     # memory, redis or none
//!     backend: memory
//!     redis_url: redis://127.0.0.1/
//! rankings:
//!     # cached or direct
//!     strategy: cached
//! http:
//!     # Seconds, 0 disables the Cache-Control headers.
//!     cache_max_age: 86400
//! ```
//!
//! # Example
//!
//! ```
//! # use tally::config::Config;
//! let config = Config::new("somefile.yml");
//! config.load_from_string("
//! server:
//!     port: 12345
//! ", None).unwrap();
//!
//! assert_eq!(config.current().query("server.port").as_i64().unwrap(), 12345);
//! assert_eq!(config.current().int_or("server.workers", 16), 16);
//! ```
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::platform::Platform;

/// Provides access to the system configuration.
///
/// Most probably a config instance is installed by the [Builder](crate::builder::Builder) and
/// can be obtained via `platform.require::<Config>()`.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// The message itself carries no data. Once one is received, the config has changed and needs
/// to be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
///
/// Note that this handle should not be kept around, as it will not be updated if the underlying
/// config changes.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates a new config reading the given file.
    ///
    /// Note that this will neither load the file nor install a change listener. This is done by
    /// the [install](install) function.
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::Hash(Default::default()), None))),
            tx,
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file on disk.
    ///
    /// An unmounted docker volume shows up as directory, therefore only files are considered.
    #[cfg(not(test))]
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Reads the underlying file and replaces the current config with its contents.
    pub async fn load(&self) -> anyhow::Result<()> {
        log::info!("Loading config file {}...", &self.filename);

        match tokio::fs::metadata(&self.filename).await {
            Ok(metadata) if metadata.is_file() => (),
            _ => {
                log::info!("Config file doesn't exist or isn't a file - using defaults.");
                return Ok(());
            }
        }

        let config_data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        let last_modified = tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok());

        self.load_from_string(config_data.as_str(), last_modified)
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// Malformed data is rejected and leaves the current config untouched. After a successful
    /// load, all change listeners are notified.
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let docs = YamlLoader::load_from_str(data).map_err(|error| {
            anyhow::anyhow!("Cannot parse config file {}: {}", &self.filename, error)
        })?;

        let root = match docs.into_iter().next() {
            Some(hash @ Yaml::Hash(_)) => hash,
            _ => Yaml::Hash(Default::default()),
        };

        self.config.store(Arc::new((root, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.send(());

        Ok(())
    }
}

impl Handle {
    /// Provides access to the root of the currently loaded configuration.
    pub fn root(&self) -> &Yaml {
        &self.config.0
    }

    /// Resolves a dotted path like **server.port** within the loaded configuration.
    ///
    /// Returns **Yaml::BadValue** if any part of the path is missing.
    pub fn query(&self, path: impl AsRef<str>) -> &Yaml {
        path.as_ref()
            .split('.')
            .fold(self.root(), |node, key| &node[key])
    }

    /// Returns the string at the given path or the given default if absent.
    pub fn str_or(&self, path: impl AsRef<str>, default: &str) -> String {
        self.query(path).as_str().unwrap_or(default).to_owned()
    }

    /// Returns the integer at the given path or the given default if absent.
    pub fn int_or(&self, path: impl AsRef<str>, default: i64) -> i64 {
        self.query(path).as_i64().unwrap_or(default)
    }
}

/// Creates and installs a **Config** for the given platform.
///
/// This reads **config/settings.yml** and installs a change listener for this file. The listener
/// only watches the "last modified" date of the file, therefore each config user has to handle
/// partial changes gracefully.
///
/// Note that this is also called by the [Builder](crate::builder::Builder) unless disabled.
pub async fn install(platform: Arc<Platform>) {
    let path = Path::new("config").to_path_buf();
    if let Err(error) = tokio::fs::create_dir_all(path.clone()).await {
        log::warn!(
            "Failed to create config base directory {}: {}",
            path.to_string_lossy(),
            error
        )
    }

    let config = Arc::new(Config::new("config/settings.yml"));
    platform.register::<Config>(config.clone());

    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    run_config_change_monitor(platform, config);
}

#[cfg(test)]
fn run_config_change_monitor(_platform: Arc<Platform>, _config: Arc<Config>) {
    // No automatic updates during testing...
}

#[cfg(not(test))]
fn run_config_change_monitor(platform: Arc<Platform>, config: Arc<Config>) {
    crate::spawn!(async move {
        while platform.is_running() {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;

            let last_modified = config.last_modified().await;
            let last_loaded = config.config.load().1;

            // Reload if a file is present and newer than the one loaded before (or if nothing
            // has been loaded so far)...
            if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded) {
                match config.load().await {
                    Ok(_) => log::info!("System configuration was re-loaded."),
                    Err(error) => log::error!("Failed to re-load system config: {:#}", error),
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::config::Config;
    use std::time::SystemTime;

    #[test]
    fn dotted_paths_are_resolved() {
        let config = Config::new("test.yml");
        config
            .load_from_string(
                "
                database:
                    path: ':memory:'
                counters:
                    backend: redis
                ",
                None,
            )
            .unwrap();

        let handle = config.current();
        assert_eq!(handle.str_or("database.path", "tally.db"), ":memory:");
        assert_eq!(handle.str_or("counters.backend", "memory"), "redis");
        assert_eq!(handle.str_or("counters.redis_url", "redis://x/"), "redis://x/");
        assert_eq!(handle.int_or("server.port", 8080), 8080);
        assert_eq!(handle.query("server.port.deeper").is_badvalue(), true);
    }

    #[test]
    fn an_empty_config_yields_defaults() {
        let config = Config::new("test.yml");
        config.load_from_string("", None).unwrap();
        assert_eq!(config.current().int_or("http.cache_max_age", 86400), 86400);
    }

    #[test]
    fn ensure_config_update_works() {
        crate::testing::test_async(async {
            let platform = Builder::new().enable_config().build().await;
            let config = platform.require::<Config>();

            config
                .load_from_string("test: 42", Some(SystemTime::now()))
                .unwrap();

            let mut change_notifier = config.notifier();
            let (tx, rx) = tokio::sync::oneshot::channel();
            crate::spawn!(async move {
                if change_notifier.recv().await.is_ok() {
                    let _ = tx.send(());
                }
            });

            // A malformed config is rejected and the previous one stays active...
            assert_eq!(
                config
                    .load_from_string("test: 'invalid", Some(SystemTime::now()))
                    .is_err(),
                true
            );
            assert_eq!(config.current().int_or("test", 0), 42);

            config
                .load_from_string("test: 4242", Some(SystemTime::now()))
                .unwrap();

            assert_eq!(rx.await.is_ok(), true);
            assert_eq!(config.current().int_or("test", 0), 4242);
        });
    }
}
