//! # Process Logging
//!
//! Routes the `log` facade to stdout and to a timestamped file. Only the newest
//! file for an application survives a restart.

use anyhow::Result;
use std::fs;
use std::path::Path;

/// Installs the global logger.
///
/// # Arguments
/// * `log_dir` - Directory for log files; created when missing.
/// * `log_level` - `trace`, `debug`, `info`, `warn` or `error` (anything else is `info`).
/// * `app_name` - Prefix of the log file name.
pub fn setup_logging(log_dir: &Path, log_level: &str, app_name: &str) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    // Clean up old log files, keeping only the most recent one
    cleanup_old_logs(log_dir, app_name)?;

    let log_file_name = format!(
        "{}_{}.log",
        app_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = log_dir.join(log_file_name);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        .chain(std::io::stdout())
        .chain(fern::log_file(log_path)?)
        .apply()?;

    Ok(())
}

/// Maps a textual level to a `log` filter.
pub fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

fn cleanup_old_logs(log_dir: &Path, app_name: &str) -> Result<()> {
    let prefix = format!("{}_", app_name);
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "log"))
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, e))
        })
        .collect();

    // Sort by modification time, newest first
    entries.sort_by_key(|(modified, _)| std::cmp::Reverse(*modified));

    for (_, entry) in entries.iter().skip(1) {
        if let Err(e) = fs::remove_file(entry.path()) {
            eprintln!("Failed to delete old log file {:?}: {}", entry.path(), e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_levels_default_to_info() {
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_level("fatal"), log::LevelFilter::Info);
    }

    #[test]
    fn cleanup_keeps_only_newest_file_of_the_app() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("server_simrail_1.log");
        let other_app = dir.path().join("other_1.log");
        fs::write(&old, "old").unwrap();
        fs::write(&other_app, "other").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let newest = dir.path().join("server_simrail_2.log");
        fs::write(&newest, "new").unwrap();

        cleanup_old_logs(dir.path(), "server_simrail").unwrap();

        assert!(!old.exists());
        assert!(newest.exists());
        assert!(other_app.exists());
    }
}
