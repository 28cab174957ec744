//! Import progress and result state.
//!
//! An [`ImportTracker`] is the explicit, caller-owned state for one
//! import/export session. The importer mutates it once per row; HTTP
//! handlers read snapshots of it for polling.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Aggregate outcome of processing all rows in one uploaded file.
///
/// `success + failed <= total`; rows skipped by cancellation count in neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    #[serde(default)]
    pub cancelled: bool,
}

impl ImportResult {
    pub fn empty(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Result recorded when the file itself could not be read.
    pub fn file_error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Self::default()
        }
    }

    pub fn record_failure(&mut self, row_number: usize, message: &str) {
        self.failed += 1;
        self.errors.push(format!("Row {}: {}", row_number, message));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
}

impl ImportProgress {
    pub fn new(current: usize, total: usize, current_item: Option<String>) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            ((current as f64 / total as f64) * 100.0).round().min(100.0) as u8
        };
        Self {
            current,
            total,
            percentage,
            current_item,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportPhase {
    #[default]
    Idle,
    Importing,
    Complete,
}

/// Point-in-time view of a tracker, as rendered by the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStatus {
    pub phase: ImportPhase,
    pub is_importing: bool,
    pub is_exporting: bool,
    pub progress: Option<ImportProgress>,
    pub result: Option<ImportResult>,
}

/// Shared handle to one session's import/export state.
#[derive(Debug, Clone, Default)]
pub struct ImportTracker {
    state: Arc<RwLock<ImportStatus>>,
    cancelled: Arc<AtomicBool>,
}

impl ImportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, ImportStatus> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> RwLockReadGuard<'_, ImportStatus> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Idle/Complete -> Importing. Clears the previous run's progress and result.
    ///
    /// Check and transition happen under one write lock; returns `false` and
    /// leaves the state alone when an import is already running.
    pub fn try_begin_import(&self) -> bool {
        let mut state = self.write();
        if state.is_importing {
            return false;
        }
        self.cancelled.store(false, Ordering::SeqCst);
        state.phase = ImportPhase::Importing;
        state.is_importing = true;
        state.progress = None;
        state.result = None;
        true
    }

    pub fn update_progress(&self, progress: ImportProgress) {
        self.write().progress = Some(progress);
    }

    /// Importing -> Complete. Always carries a result, even an empty one.
    pub fn finish_import(&self, result: ImportResult) {
        let mut state = self.write();
        state.phase = ImportPhase::Complete;
        state.is_importing = false;
        state.result = Some(result);
    }

    pub fn begin_export(&self) {
        self.write().is_exporting = true;
    }

    pub fn finish_export(&self) {
        self.write().is_exporting = false;
    }

    /// Clear progress and results and go back to Idle.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        let mut state = self.write();
        state.phase = ImportPhase::Idle;
        state.is_importing = false;
        state.progress = None;
        state.result = None;
    }

    /// Reset unless an import is running. Returns whether the reset happened.
    pub fn try_reset(&self) -> bool {
        let mut state = self.write();
        if state.is_importing {
            return false;
        }
        self.cancelled.store(false, Ordering::SeqCst);
        *state = ImportStatus {
            is_exporting: state.is_exporting,
            ..ImportStatus::default()
        };
        true
    }

    /// Ask a running import to stop before its next row.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ImportStatus {
        self.read().clone()
    }
}

/// In-memory map of session id to tracker.
#[derive(Debug, Clone, Default)]
pub struct TrackerRegistry {
    inner: Arc<RwLock<HashMap<String, ImportTracker>>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, session_id: &str) -> ImportTracker {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.entry(session_id.to_string()).or_default().clone()
    }

    pub fn get(&self, session_id: &str) -> Option<ImportTracker> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    /// Known session ids, sorted.
    pub fn sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn remove(&self, session_id: &str) -> Option<ImportTracker> {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(ImportProgress::new(1, 3, None).percentage, 33);
        assert_eq!(ImportProgress::new(2, 3, None).percentage, 67);
        assert_eq!(ImportProgress::new(3, 3, None).percentage, 100);
        assert_eq!(ImportProgress::new(0, 0, None).percentage, 100);
    }

    #[test]
    fn test_state_machine() {
        let tracker = ImportTracker::new();
        assert_eq!(tracker.snapshot().phase, ImportPhase::Idle);

        assert!(tracker.try_begin_import());
        let status = tracker.snapshot();
        assert_eq!(status.phase, ImportPhase::Importing);
        assert!(status.is_importing);
        assert!(status.result.is_none());

        tracker.update_progress(ImportProgress::new(1, 2, Some("Alice".into())));
        assert_eq!(tracker.snapshot().progress.unwrap().current_item.as_deref(), Some("Alice"));

        tracker.finish_import(ImportResult::empty(0));
        let status = tracker.snapshot();
        assert_eq!(status.phase, ImportPhase::Complete);
        assert!(!status.is_importing);
        assert_eq!(status.result, Some(ImportResult::default()));

        tracker.reset();
        assert_eq!(tracker.snapshot(), ImportStatus::default());
    }

    #[test]
    fn test_cancel_flag_cleared_on_begin_and_reset() {
        let tracker = ImportTracker::new();
        tracker.cancel();
        assert!(tracker.is_cancelled());
        assert!(tracker.try_begin_import());
        assert!(!tracker.is_cancelled());
        tracker.cancel();
        tracker.reset();
        assert!(!tracker.is_cancelled());
    }

    #[test]
    fn test_begin_refused_while_importing() {
        let tracker = ImportTracker::new();
        assert!(tracker.try_begin_import());
        tracker.update_progress(ImportProgress::new(1, 4, None));
        tracker.cancel();

        assert!(!tracker.try_begin_import());
        assert!(!tracker.try_reset());
        let status = tracker.snapshot();
        assert!(status.is_importing);
        assert_eq!(status.progress.unwrap().current, 1);
        assert!(tracker.is_cancelled());

        tracker.finish_import(ImportResult::empty(4));
        assert!(tracker.try_reset());
        assert_eq!(tracker.snapshot(), ImportStatus::default());
    }

    #[test]
    fn test_only_one_concurrent_begin_wins() {
        let tracker = ImportTracker::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || tracker.try_begin_import())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_registry_shares_trackers() {
        let registry = TrackerRegistry::new();
        let a = registry.get_or_create("s1");
        a.begin_export();
        assert!(registry.get("s1").unwrap().snapshot().is_exporting);
        assert!(registry.get("s2").is_none());
        registry.get_or_create("s0");
        assert_eq!(registry.sessions(), vec!["s0", "s1"]);
        assert!(registry.remove("s1").is_some());
        assert!(registry.get("s1").is_none());
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let mut result = ImportResult::empty(2);
        result.success = 1;
        result.record_failure(3, "Name is required");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "total": 2, "success": 1, "failed": 1,
                "errors": ["Row 3: Name is required"], "cancelled": false
            })
        );
    }
}
