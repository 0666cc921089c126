// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use std::{fs::File, path::Path, sync::Mutex};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber: compact console output plus an optional
/// plain-text copy in `log_file`. A second call is a no-op.
pub fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console = fmt::layer().with_target(false).compact();

    let file = match log_file {
        Some(path) => {
            let f = File::create(path)
                .with_context(|| format!("create log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(f))
                    .with_ansi(false)
                    .with_target(false),
            )
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();

    if let Some(path) = log_file {
        tracing::debug!("logging to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_is_created_and_reinit_is_harmless() {
        let path = std::env::temp_dir().join(format!("threed-core-{}.log", std::process::id()));
        init_tracing(Some(&path)).unwrap();
        assert!(path.exists());
        init_tracing(None).unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unwritable_log_path_is_an_error() {
        let dir = std::env::temp_dir().join("threed-core-missing-dir-xyz/nested/file.log");
        assert!(init_tracing(Some(&dir)).is_err());
    }
}
