// ============================================================================
// ENGINE CONFIG – settings file for the tile engine and the headless tool
// ============================================================================

use std::path::Path;

use crate::error::{Result, TileError};
use crate::tiles::ChannelLayout;

/// Tunables of the tile engine.
///
/// Stored as one `key=value` pair per line. Unknown keys are ignored and
/// unparsable values keep their defaults, so old or hand-edited files still
/// load.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Number of tile-store shards (power of two).
    pub shard_count: usize,
    /// Composite independent tiles on the rayon pool.
    pub parallel_compositing: bool,
    /// Worker threads for the rayon pool; 0 keeps rayon's default.
    pub worker_threads: usize,
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub log_level: String,
    /// Layout of devices created by the headless tool.
    pub default_layout: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shard_count: 64,
            parallel_compositing: true,
            worker_threads: 0,
            log_level: "info".to_string(),
            default_layout: "rgba8".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse settings text. Never fails; problems are logged and skipped.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "shard_count" => match val.parse::<usize>() {
                    Ok(n) if n > 0 && n.is_power_of_two() => s.shard_count = n,
                    _ => log::warn!("config: ignoring shard_count={}", val),
                },
                "parallel_compositing" => {
                    s.parallel_compositing = val == "true";
                }
                "worker_threads" => match val.parse() {
                    Ok(n) => s.worker_threads = n,
                    Err(_) => log::warn!("config: ignoring worker_threads={}", val),
                },
                "log_level" => match val.to_ascii_lowercase().parse::<log::LevelFilter>() {
                    Ok(_) => s.log_level = val.to_ascii_lowercase(),
                    Err(_) => log::warn!("config: ignoring log_level={}", val),
                },
                "default_layout" => match ChannelLayout::from_name(val) {
                    Ok(_) => s.default_layout = val.to_ascii_lowercase(),
                    Err(_) => log::warn!("config: ignoring default_layout={}", val),
                },
                _ => {
                    log::debug!("config: unknown key '{}'", key);
                }
            }
        }
        s
    }

    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("config: {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Settings text accepted by [`EngineConfig::parse`].
    pub fn to_config_string(&self) -> String {
        format!(
            "shard_count={}\n\
             parallel_compositing={}\n\
             worker_threads={}\n\
             log_level={}\n\
             default_layout={}\n",
            self.shard_count,
            self.parallel_compositing,
            self.worker_threads,
            self.log_level,
            self.default_layout,
        )
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_config_string())?;
        Ok(())
    }

    /// Reject values that were set programmatically to something unusable.
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 || !self.shard_count.is_power_of_two() {
            return Err(TileError::Config(format!(
                "shard_count must be a power of two, got {}",
                self.shard_count
            )));
        }
        self.level_filter()?;
        self.layout()?;
        Ok(())
    }

    pub fn level_filter(&self) -> Result<log::LevelFilter> {
        self.log_level
            .parse()
            .map_err(|_| TileError::Config(format!("unknown log level '{}'", self.log_level)))
    }

    pub fn layout(&self) -> Result<ChannelLayout> {
        ChannelLayout::from_name(&self.default_layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ignores_unknown_and_bad_values() {
        let cfg = EngineConfig::parse(
            "# engine\n\
             shard_count=16\n\
             parallel_compositing=false\n\
             worker_threads=abc\n\
             theme_mode=dark\n\
             default_layout=RGBA16\n\
             log_level=loud\n",
        );
        assert_eq!(cfg.shard_count, 16);
        assert!(!cfg.parallel_compositing);
        assert_eq!(cfg.worker_threads, 0);
        assert_eq!(cfg.default_layout, "rgba16");
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn shard_count_must_be_power_of_two() {
        assert_eq!(EngineConfig::parse("shard_count=12").shard_count, 64);
        let cfg = EngineConfig { shard_count: 12, ..EngineConfig::default() };
        assert!(matches!(cfg.validate(), Err(TileError::Config(_))));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("paintfe_tiles_cfg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine.cfg");
        let cfg = EngineConfig {
            shard_count: 8,
            parallel_compositing: false,
            worker_threads: 3,
            log_level: "debug".into(),
            default_layout: "graya8".into(),
        };
        cfg.save_to(&path).unwrap();
        assert_eq!(EngineConfig::load_from(&path).unwrap(), cfg);
        assert_eq!(EngineConfig::load_from(&dir.join("missing.cfg")).unwrap(), EngineConfig::default());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
