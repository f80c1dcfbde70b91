//! udev Blacklist
//!
//! While partition tables are rebuilt, the rules that would otherwise react
//! to new partitions (persistent naming, multipath, md auto-assembly) are
//! overridden with a no-op rule. Overrides that already existed are parked
//! under a suffix and restored afterwards.

use crate::config::PlannerConfig;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Rules suppressed for the duration of a rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UdevBlacklist {
    /// Override symlinks created in the rules directory
    pub overrides: Vec<PathBuf>,
    /// Existing overrides moved out of the way
    pub parked: Vec<PathBuf>,
}

impl UdevBlacklist {
    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

/// Rule file names in the library directory matching the blacklist patterns
pub fn matching_rules(config: &PlannerConfig) -> Result<Vec<String>> {
    let mut names = Vec::new();

    for pattern in &config.udev_blacklist {
        let full = config.udev_rules_lib_dir.join(pattern);
        let full = full.to_string_lossy();
        let entries = glob::glob(&full)
            .map_err(|e| Error::Configuration(format!("bad udev pattern '{}': {}", pattern, e)))?;

        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().and_then(|n| n.to_str()) {
                if !names.iter().any(|known| known == name) {
                    names.push(name.to_string());
                }
            }
        }
    }

    names.sort();
    Ok(names)
}

fn parked_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Override every matching rule with a link to an empty rule file
///
/// Per-rule failures are logged and skipped; the caller reloads udev once
/// the returned set is in place.
pub async fn blacklist(config: &PlannerConfig) -> Result<UdevBlacklist> {
    let rules_dir = &config.udev_rules_dir;
    fs::create_dir_all(rules_dir).await?;

    let empty_rule = rules_dir.join(&config.udev_empty_rule);
    fs::write(&empty_rule, b"").await?;

    let mut state = UdevBlacklist::default();
    for name in matching_rules(config)? {
        let target = rules_dir.join(&name);

        if fs::symlink_metadata(&target).await.is_ok() {
            let parked = parked_path(&target, &config.udev_rename_suffix);
            if let Err(e) = fs::rename(&target, &parked).await {
                warn!("Cannot park udev rule {}: {}", target.display(), e);
                continue;
            }
            state.parked.push(parked);
        }

        match fs::symlink(&empty_rule, &target).await {
            Ok(()) => {
                debug!("Blacklisted udev rule {}", name);
                state.overrides.push(target);
            }
            Err(e) => warn!("Cannot override udev rule {}: {}", target.display(), e),
        }
    }

    info!("Blacklisted {} udev rules", state.overrides.len());
    Ok(state)
}

/// Remove overrides and restore parked rules
pub async fn unblacklist(config: &PlannerConfig, state: &UdevBlacklist) {
    for link in &state.overrides {
        if let Err(e) = fs::remove_file(link).await {
            warn!("Cannot remove udev override {}: {}", link.display(), e);
        }
    }

    for parked in &state.parked {
        let Some(original) = parked
            .to_str()
            .and_then(|p| p.strip_suffix(config.udev_rename_suffix.as_str()))
        else {
            continue;
        };
        if let Err(e) = fs::rename(parked, original).await {
            warn!("Cannot restore udev rule {}: {}", original, e);
        }
    }

    info!("Restored {} udev rules", state.overrides.len());
}
