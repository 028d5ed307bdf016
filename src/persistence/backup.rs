// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Rotating backups of the sqlite database file (§4.G, §6).

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::Result;

/// Copies `db_path` into `backups_dir` as `backup_<YYYYMMDD_HHMMSS>.db`
/// and trims the directory down to `max_backups`, oldest first.
pub fn run_backup(db_path: &Path, backups_dir: &Path, max_backups: usize) -> Result<PathBuf> {
    std::fs::create_dir_all(backups_dir)?;
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let dest = backups_dir.join(format!("backup_{stamp}.db"));
    std::fs::copy(db_path, &dest)?;
    prune_backups(backups_dir, max_backups)?;
    Ok(dest)
}

fn prune_backups(backups_dir: &Path, max_backups: usize) -> Result<()> {
    let mut entries: Vec<(PathBuf, std::time::SystemTime)> = std::fs::read_dir(backups_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("backup_")
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.path(), modified))
        })
        .collect();

    if entries.len() <= max_backups {
        return Ok(());
    }

    entries.sort_by_key(|(_, modified)| *modified);
    let excess = entries.len() - max_backups;
    for (path, _) in entries.into_iter().take(excess) {
        let _ = std::fs::remove_file(path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn keeps_only_the_newest_max_backups() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("camera_data.db");
        fs::write(&db_path, b"fake-db").unwrap();
        let backups_dir = dir.path().join("backups");

        for i in 0..5 {
            let dest = backups_dir.join(format!("backup_{i:02}.db"));
            fs::create_dir_all(&backups_dir).unwrap();
            fs::write(&dest, b"fake-db").unwrap();
            // force distinguishable mtimes on filesystems with coarse resolution
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        prune_backups(&backups_dir, 3).unwrap();
        let remaining: Vec<_> = fs::read_dir(&backups_dir).unwrap().collect();
        assert_eq!(remaining.len(), 3);
    }

    #[test]
    fn run_backup_copies_and_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("camera_data.db");
        fs::write(&db_path, b"fake-db").unwrap();
        let backups_dir = dir.path().join("backups");

        let dest = run_backup(&db_path, &backups_dir, 10).unwrap();
        assert!(dest.exists());
        assert!(dest.file_name().unwrap().to_string_lossy().starts_with("backup_"));
    }
}
