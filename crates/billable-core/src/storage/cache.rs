//! Durable local cache of the timer table (JSON format)
//!
//! The whole table is written on every save. Writes go to a sibling temp
//! file which is synced and then renamed over the previous cache, so a crash
//! mid-write leaves the last committed table intact.

use crate::{models::Timer, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

const CACHE_FILE: &str = "timers.json";
const CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CachedTable {
    version: u32,
    saved_at: DateTime<Utc>,
    timers: Vec<Timer>,
}

pub struct TimerCache {
    data_dir: PathBuf,
}

impl TimerCache {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn path(&self) -> PathBuf {
        self.data_dir.join(CACHE_FILE)
    }

    pub fn load(&self) -> Result<Vec<Timer>> {
        let path = self.path();

        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let table: CachedTable = serde_json::from_str(&content)?;
        if table.version != CACHE_VERSION {
            return Err(Error::InvalidData(format!(
                "Unsupported timer cache version {}",
                table.version
            )));
        }

        Ok(table.timers)
    }

    pub fn save(&self, timers: &[Timer], saved_at: DateTime<Utc>) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;

        let table = CachedTable {
            version: CACHE_VERSION,
            saved_at,
            timers: timers.to_vec(),
        };
        let content = serde_json::to_vec_pretty(&table)?;

        let path = self.path();
        let tmp_path = tmp_path_for(&path);
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&content)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &path)?;

        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
