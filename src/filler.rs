use std::path::{Path, PathBuf};

/// Finds the local copy of the filler video shown after a short first video.
pub trait FillerResolver: Send + Sync + 'static {
    fn resolve(&self, name: &str) -> Option<PathBuf>;
}

/// Serves the filler from a cache directory, seeding it from the bundled
/// assets directory on first use.
pub struct CacheFillerResolver {
    cache_dir: PathBuf,
    assets_dir: PathBuf,
}

impl CacheFillerResolver {
    pub fn new(cache_dir: impl Into<PathBuf>, assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            assets_dir: assets_dir.into(),
        }
    }

    fn seed(&self, name: &str, cached: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        std::fs::copy(self.assets_dir.join(name), cached)?;
        Ok(())
    }
}

impl FillerResolver for CacheFillerResolver {
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let cached = self.cache_dir.join(name);
        if cached.is_file() {
            return Some(cached);
        }
        match self.seed(name, &cached) {
            Ok(()) => {
                log::info!("filler {} copied to {}", name, cached.display());
                Some(cached)
            }
            Err(e) => {
                log::error!("filler {} unavailable: {}", name, e);
                None
            }
        }
    }
}
