//! Address allow-list and its periodically reloaded snapshot.

use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Immutable address -> display name snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMap {
    entries: HashMap<IpAddr, String>,
}

impl IdentityMap {
    /// Parse allow-list text: one `address-displayName` entry per line.
    ///
    /// The address ends at the first `-`. Blank lines and `#` comments are
    /// skipped, as are lines whose address does not parse.
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((addr, nickname)) = line.split_once('-') else {
                warn!("allow-list line {} has no '-' separator, skipping", lineno + 1);
                continue;
            };
            match addr.trim().parse::<IpAddr>() {
                Ok(ip) => {
                    entries.insert(ip.to_canonical(), nickname.trim().to_string());
                }
                Err(e) => {
                    warn!(
                        "allow-list line {} has invalid address {:?}: {}",
                        lineno + 1,
                        addr,
                        e
                    );
                }
            }
        }
        Self { entries }
    }

    /// Read and parse an allow-list file.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading allow-list {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn lookup(&self, addr: IpAddr) -> Option<&str> {
        self.entries.get(&addr.to_canonical()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(IpAddr, String)> for IdentityMap {
    fn from_iter<I: IntoIterator<Item = (IpAddr, String)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(ip, name)| (ip.to_canonical(), name))
                .collect(),
        }
    }
}

/// Resolves peer addresses against the current allow-list snapshot.
#[derive(Debug)]
pub struct IdentityResolver {
    source: Option<PathBuf>,
    current: RwLock<Arc<IdentityMap>>,
}

impl IdentityResolver {
    /// Load the allow-list at `path`. Failure here is a startup error.
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = IdentityMap::load(&path).await?;
        info!(
            "Loaded {} allow-list entr{} from {}",
            map.len(),
            if map.len() == 1 { "y" } else { "ies" },
            path.display()
        );
        Ok(Self {
            source: Some(path),
            current: RwLock::new(Arc::new(map)),
        })
    }

    /// Resolver over a fixed map with no backing file.
    pub fn fixed(map: IdentityMap) -> Self {
        Self {
            source: None,
            current: RwLock::new(Arc::new(map)),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<IdentityMap> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Display name for `addr`, if allowed.
    pub fn resolve(&self, addr: IpAddr) -> Option<String> {
        self.snapshot().lookup(addr).map(str::to_string)
    }

    /// Re-read the backing file and swap in the new snapshot.
    ///
    /// On error the previous snapshot stays in place.
    pub async fn reload(&self) -> Result<usize> {
        let Some(path) = &self.source else {
            return Ok(self.snapshot().len());
        };
        let map = IdentityMap::load(path).await?;
        let count = map.len();
        self.replace(map);
        Ok(count)
    }

    /// Wholesale-replace the snapshot.
    pub fn replace(&self, map: IdentityMap) {
        let map = Arc::new(map);
        match self.current.write() {
            Ok(mut guard) => *guard = map,
            Err(poisoned) => *poisoned.into_inner() = map,
        }
    }

    /// Reload the allow-list every `period` until `shutdown` fires.
    pub fn spawn_reload(
        self: Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        info!("Reloading allow-list...");
                        match self.reload().await {
                            Ok(count) => info!("Allow-list reloaded: {} entries", count),
                            Err(e) => warn!("Allow-list reload failed, keeping previous entries: {:#}", e),
                        }
                    }
                }
            }
        })
    }
}
