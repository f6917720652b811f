//! Config directory resolution for pkgsync
//!
//! # Path Resolution Priority
//!
//! 1. `--config-dir` flag
//! 2. `PKGSYNC_CONFIG_DIR` environment variable
//! 3. `XDG_CONFIG_HOME/pkgsync` (if set)
//! 4. Platform default:
//!    - Windows: `%APPDATA%\pkgsync`
//!    - macOS/Linux: `~/.config/pkgsync`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "PKGSYNC_CONFIG_DIR";

/// Get the pkgsync config directory path
pub fn config_dir(flag: Option<&Path>) -> Result<PathBuf> {
    // 1. Explicit flag
    if let Some(dir) = flag {
        let path = expand(&dir.to_string_lossy());
        log::debug!("Using config dir from --config-dir: {}", path.display());
        return Ok(path);
    }

    // 2. Environment variable override
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    // 3. XDG_CONFIG_HOME
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME")
        && !xdg_config.is_empty()
    {
        let path = PathBuf::from(xdg_config).join("pkgsync");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    // 4. Platform default
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            let path = app_data.join("pkgsync");
            log::debug!("Using Windows config dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("pkgsync");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, PoisonError};

    /// Serializes tests that touch the process environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Run `f` with `key` set to `value`, restoring the previous value after
    fn with_env_var<F, R>(key: &str, value: Option<&str>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        match value {
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        let result = f();
        match original {
            // SAFETY: Tests run in isolation
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    #[test]
    fn test_flag_wins() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        with_env_var(ENV_CONFIG_DIR, Some("/from/env"), || {
            let result = config_dir(Some(Path::new("/from/flag"))).unwrap();
            assert_eq!(result, PathBuf::from("/from/flag"));
        });
    }

    #[test]
    fn test_config_dir_env_override_with_tilde() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let home = dirs::home_dir().unwrap();
        with_env_var(ENV_CONFIG_DIR, Some("~/dotfiles/pkgsync-tilde-test"), || {
            let result = config_dir(None).unwrap();
            assert_eq!(result, home.join("dotfiles").join("pkgsync-tilde-test"));
        });
    }

    #[cfg(unix)]
    #[test]
    fn test_xdg_config_home() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        with_env_var(ENV_CONFIG_DIR, None, || {
            with_env_var("XDG_CONFIG_HOME", Some("/tmp/xdg-config-test"), || {
                let result = config_dir(None).unwrap();
                assert_eq!(result, PathBuf::from("/tmp/xdg-config-test/pkgsync"));
            });
        });
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_VAR_12345/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_VAR_12345/file"));
    }
}
