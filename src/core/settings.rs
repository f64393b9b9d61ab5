use anyhow::{Context, Result};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sync: SyncSettings,
    pub fanout: FanoutSettings,
    pub server: ServerSettings,
    pub data: DataSettings,
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sync: SyncSettings::default(),
            fanout: FanoutSettings::default(),
            server: ServerSettings::default(),
            data: DataSettings::default(),
            debug: false,
        }
    }
}

/// Inbox sync orchestration knobs (client side).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Minimum wait between sync attempts for one account.
    pub cooldown_secs: u64,
    /// How long the client waits on the scan job before declaring a soft
    /// timeout. The server job keeps running either way.
    pub client_timeout_secs: u64,
    /// Last-resort reset that clears a stuck "syncing" flag unconditionally.
    pub safety_reset_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            client_timeout_secs: 90,
            safety_reset_secs: 120,
        }
    }
}

/// Server fan-out pass configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutSettings {
    pub interval_secs: u64,
    pub look_back_hours: i64,
    pub look_ahead_hours: i64,
    /// Per-owner cooldown on the aggregation entry point, shared by every
    /// caller (fan-out, poll ticks, manual refresh).
    pub owner_cooldown_secs: u64,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            interval_secs: 900,
            look_back_hours: 12,
            look_ahead_hours: 48,
            owner_cooldown_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub base_url: String,
    /// Normalized flight-status feed the server-side aggregation pulls from.
    pub status_feed_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.wayfarer.app".to_string(),
            status_feed_url: "https://status-feed.wayfarer.app".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Itinerary snapshot the daemon seeds its store from.
    pub itinerary_path: Option<PathBuf>,
}

impl DataSettings {
    pub fn itinerary_path(&self) -> Option<PathBuf> {
        self.itinerary_path
            .clone()
            .or_else(|| dirs::data_dir().map(|p| p.join("wayfarer").join("itinerary.json")))
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("wayfarer").join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path().context("Could not determine config directory")?;

        if !path.exists() {
            tracing::info!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!(?path, "Loaded config");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.client_timeout_secs >= self.sync.safety_reset_secs {
            anyhow::bail!(
                "sync.safety_reset_secs ({}) must exceed sync.client_timeout_secs ({})",
                self.sync.safety_reset_secs,
                self.sync.client_timeout_secs
            );
        }
        if self.fanout.interval_secs < 60 {
            anyhow::bail!(
                "fanout.interval_secs must be at least 60, got {}",
                self.fanout.interval_secs
            );
        }
        if self.fanout.look_back_hours <= 0 || self.fanout.look_ahead_hours <= 0 {
            anyhow::bail!("fanout look_back_hours and look_ahead_hours must be positive");
        }
        Ok(())
    }
}

/// Watches the config file and republishes settings on change.
pub struct SettingsWatcher {
    current: Arc<RwLock<Settings>>,
    tx: broadcast::Sender<Settings>,
    _watcher: Option<RecommendedWatcher>,
}

impl SettingsWatcher {
    pub fn new() -> Result<Self> {
        let settings = Settings::load()?;
        settings.validate()?;
        let (tx, _rx) = broadcast::channel(8);

        Ok(Self {
            current: Arc::new(RwLock::new(settings)),
            tx,
            _watcher: None,
        })
    }

    pub async fn get(&self) -> Settings {
        self.current.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Settings> {
        self.tx.subscribe()
    }

    pub fn start_watching(&mut self) -> Result<()> {
        let Some(path) = Settings::config_path() else {
            tracing::warn!("No config directory; settings hot reload disabled");
            return Ok(());
        };
        let Some(parent) = path.parent().map(|p| p.to_path_buf()) else {
            return Ok(());
        };
        if !parent.exists() {
            tracing::warn!(?parent, "Config directory does not exist, skipping watch");
            return Ok(());
        }

        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<()>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                if let Ok(event) = res {
                    if event.kind.is_modify() || event.kind.is_create() {
                        let hit = event.paths.iter().any(|p| {
                            p.file_name()
                                .map(|f| f.to_string_lossy() == *filename)
                                .unwrap_or(false)
                        });
                        if hit {
                            let _ = notify_tx.send(());
                        }
                    }
                }
            },
            Config::default(),
        )?;

        watcher
            .watch(&parent, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", parent.display()))?;
        tracing::info!(?parent, "Watching config directory");

        let current = Arc::clone(&self.current);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            while notify_rx.recv().await.is_some() {
                // Editors fire several events per save; settle first.
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                while notify_rx.try_recv().is_ok() {}

                match Settings::load().and_then(|s| s.validate().map(|()| s)) {
                    Ok(settings) => {
                        tracing::info!("Config changed on disk, applying");
                        *current.write().await = settings.clone();
                        let _ = tx.send(settings);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring invalid config change");
                    }
                }
            }
        });

        self._watcher = Some(watcher);
        Ok(())
    }
}
