use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::RelayConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "mirrelay.toml",
    "mirrelay.yaml",
    "mirrelay.yml",
    "mirrelay.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./mirrelay.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/mirrelay/mirrelay.{toml,yaml,yml,json}` (user-global)
///
/// Returns `RelayConfig::default()` if no config file is found.
pub fn discover_and_load() -> RelayConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    RelayConfig::default()
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<RelayConfig> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml")
        .to_ascii_lowercase();

    let cfg = match ext.as_str() {
        "toml" => toml::from_str(raw)?,
        "yaml" | "yml" => serde_yaml::from_str(raw)?,
        "json" => serde_json::from_str(raw)?,
        other => anyhow::bail!("unsupported config format: .{other}"),
    };
    Ok(cfg)
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/mirrelay/
    if let Some(dirs) = directories::ProjectDirs::from("", "", "mirrelay") {
        let config_dir = dirs.config_dir();
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirrelay.toml");
        std::fs::write(
            &path,
            r#"
            [backend]
            base_url = "https://backend.example.com"
            worker_key = "k"
            "#,
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.backend.base_url, "https://backend.example.com");
    }

    #[test]
    fn loads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirrelay.yaml");
        std::fs::write(
            &path,
            "backend:\n  base_url: https://backend.example.com\nwatcher:\n  quiet_period_ms: 750\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.watcher.quiet_period_ms, 750);
    }

    #[test]
    fn loads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirrelay.json");
        std::fs::write(&path, r#"{"sender": {"max_attachments": 3}}"#).unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.sender.max_attachments, 3);
    }

    #[test]
    fn substitutes_env_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirrelay.toml");
        std::fs::write(
            &path,
            "[watcher]\nreconcile_interval_secs = ${RELAY_UNSET_INTERVAL:-7}\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.watcher.reconcile_interval_secs, 7);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirrelay.ini");
        std::fs::write(&path, "x").unwrap();
        assert!(load_config(&path).is_err());
    }
}
