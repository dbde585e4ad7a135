//! Persistence layer for the hour → mode schedule
//!
//! This module handles saving and loading the schedule table across restarts.
//! The table is stored as a single versioned JSON slot, overwritten whole on
//! every save; there are no partial updates.

use crate::error::{HeliosError, Result};
use crate::logging::get_logger;
use crate::schedule::ScheduleTable;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk slot version
pub const STORAGE_VERSION: u32 = 1;

/// Versioned envelope for the stored schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSchedule {
    version: u32,
    schedule: ScheduleTable,
}

/// Schedule persistence slot
pub struct ScheduleStore {
    file_path: String,
    logger: crate::logging::StructuredLogger,
}

impl ScheduleStore {
    /// Create a new store backed by the given file
    pub fn new(file_path: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            logger: get_logger("store"),
        }
    }

    /// Load the schedule from disk; an empty table if no prior state exists
    pub fn load(&self) -> Result<ScheduleTable> {
        let path = Path::new(&self.file_path);

        if !path.exists() {
            self.logger
                .info("No schedule file found, starting with an empty schedule");
            return Ok(ScheduleTable::new());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| HeliosError::store(format!("failed to read schedule file: {}", e)))?;
        let stored: StoredSchedule = serde_json::from_str(&contents)
            .map_err(|e| HeliosError::store(format!("failed to decode schedule file: {}", e)))?;

        if stored.version != STORAGE_VERSION {
            return Err(HeliosError::store(format!(
                "unsupported schedule slot version {} (expected {})",
                stored.version, STORAGE_VERSION
            )));
        }

        self.logger
            .debug(&format!("loaded schedule with {} entries", stored.schedule.len()));
        Ok(stored.schedule)
    }

    /// Save the schedule to disk, overwriting the whole slot
    pub fn save(&self, schedule: &ScheduleTable) -> Result<()> {
        let stored = StoredSchedule {
            version: STORAGE_VERSION,
            schedule: schedule.clone(),
        };
        let contents = serde_json::to_string_pretty(&stored)
            .map_err(|e| HeliosError::store(format!("failed to encode schedule: {}", e)))?;
        std::fs::write(&self.file_path, contents)
            .map_err(|e| HeliosError::store(format!("failed to write schedule file: {}", e)))?;

        self.logger
            .debug(&format!("saved schedule with {} entries", schedule.len()));
        Ok(())
    }
}
