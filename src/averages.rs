/// Rolling averages over recent readings and their on-disk store
use log::{debug, error, warn};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::models::Reading;
use crate::utils::round_to;

/// Newest-first history of raw readings for one device
pub type AverageHistory = Vec<Reading>;

/// Push a new reading into the history and compute the smoothed value
///
/// With a window of zero the history is returned untouched and the reading
/// is passed through. Otherwise the reading is prepended, the history is cut
/// down to `window` entries and the mean of the retained entries is returned
/// with `average` set to the number of samples. Temperature keeps one
/// decimal, humidity and battery are rounded once to whole numbers. Halves
/// round to even.
///
/// # Arguments
/// * `history` - Previous readings, newest first
/// * `window` - Maximum number of readings to keep
/// * `reading` - The reading just taken
///
/// # Returns
/// The updated history and the reading to publish
pub fn apply(
    mut history: AverageHistory,
    window: usize,
    reading: Reading,
) -> (AverageHistory, Reading) {
    if window == 0 {
        return (history, reading);
    }

    // Only raw values are kept in the history
    history.insert(
        0,
        Reading {
            average: None,
            ..reading
        },
    );
    history.truncate(window);

    let count = history.len() as f64;
    let temp_sum: f64 = history.iter().map(|r| r.temperature).sum();
    let humid_sum: f64 = history.iter().map(|r| r.humidity as f64).sum();
    let battery_sum: f64 = history.iter().map(|r| r.battery as f64).sum();

    let averaged = Reading {
        temperature: round_to(temp_sum / count, 1),
        humidity: round_to(humid_sum / count, 0) as u8,
        battery: round_to(battery_sum / count, 0) as u8,
        average: Some(history.len()),
    };

    (history, averaged)
}

/// Per-device averaging histories keyed by MAC address
#[derive(Debug, Default)]
pub struct AverageStore {
    path: PathBuf,
    entries: HashMap<String, AverageHistory>,
}

impl AverageStore {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        AverageStore {
            path: path.into(),
            entries: HashMap::new(),
        }
    }

    /// Load the store, starting empty if the file is missing or unreadable
    ///
    /// A broken store only costs the smoothing history, so it never aborts
    /// a run.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::read(&path) {
            Ok(entries) => {
                debug!("Loaded {} average histories from {}", entries.len(), path.display());
                AverageStore { path, entries }
            }
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                debug!("No average store at {}, starting empty", path.display());
                Self::empty(path)
            }
            Err(e) => {
                error!("Ignoring average store {}: {}", path.display(), e);
                Self::empty(path)
            }
        }
    }

    fn read(path: &Path) -> Result<HashMap<String, AverageHistory>, StoreError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn history(&self, mac: &str) -> AverageHistory {
        self.entries.get(mac).cloned().unwrap_or_default()
    }

    pub fn set_history(&mut self, mac: &str, history: AverageHistory) {
        self.entries.insert(mac.to_string(), history);
    }

    /// Run [`apply`] against the stored history of `mac` and keep the result
    pub fn smooth(&mut self, mac: &str, window: usize, reading: Reading) -> Reading {
        if window == 0 {
            return reading;
        }
        let history = self.entries.remove(mac).unwrap_or_default();
        let (history, averaged) = apply(history, window, reading);
        self.entries.insert(mac.to_string(), history);
        averaged
    }

    /// Rewrite the whole store
    ///
    /// Data goes to a sibling temporary file first and is renamed over the
    /// store, so a crash mid-write leaves the previous store intact.
    pub fn save(&self) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            warn!("Rename of {} failed: {}", tmp.display(), e);
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(temperature: f64, humidity: u8, battery: u8) -> Reading {
        Reading::new(temperature, humidity, battery)
    }

    #[test]
    fn first_reading_starts_history() {
        let r1 = reading(20.0, 40, 90);
        let (history, out) = apply(Vec::new(), 3, r1);
        assert_eq!(history, vec![r1]);
        assert_eq!(out, Reading { average: Some(1), ..r1 });
    }

    #[test]
    fn window_drops_oldest() {
        let r1 = reading(19.0, 38, 95);
        let r2 = reading(20.0, 40, 90);
        let r3 = reading(21.0, 41, 90);
        let r4 = reading(22.0, 45, 87);

        let mut history = Vec::new();
        let mut out = r1;
        for r in [r1, r2, r3, r4] {
            let (h, o) = apply(history, 3, r);
            history = h;
            out = o;
        }

        assert_eq!(history, vec![r4, r3, r2]);
        assert_eq!(out.temperature, 21.0);
        assert_eq!(out.humidity, 42);
        assert_eq!(out.battery, 89);
        assert_eq!(out.average, Some(3));
    }

    #[test]
    fn temperature_mean_is_rounded() {
        let history = vec![reading(20.0, 40, 90), reading(20.1, 40, 90)];
        let (_, out) = apply(history, 3, reading(20.1, 41, 91));
        // 60.2 / 3 = 20.0666..
        assert_eq!(out.temperature, 20.1);
        // 121 / 3 = 40.333..
        assert_eq!(out.humidity, 40);
        // 271 / 3 = 90.333..
        assert_eq!(out.battery, 90);
    }

    #[test]
    fn humidity_mean_is_rounded_once() {
        // 809 / 20 = 40.45
        let mut history = vec![reading(20.0, 40, 90); 18];
        history.push(reading(20.0, 49, 90));
        let (_, out) = apply(history, 20, reading(20.0, 40, 90));
        assert_eq!(out.average, Some(20));
        assert_eq!(out.humidity, 40);
    }

    #[test]
    fn integer_halves_round_to_even() {
        let (_, out) = apply(vec![reading(20.0, 41, 89)], 2, reading(20.0, 40, 90));
        // 40.5 and 89.5
        assert_eq!(out.humidity, 40);
        assert_eq!(out.battery, 90);
    }

    #[test]
    fn zero_window_disables_averaging() {
        let r1 = reading(20.0, 40, 90);
        let (history, out) = apply(Vec::new(), 0, r1);
        assert!(history.is_empty());
        assert_eq!(out, r1);
        assert_eq!(out.average, None);
    }

    #[test]
    fn history_never_stores_sample_counts() {
        let r1 = Reading {
            average: Some(7),
            ..reading(20.0, 40, 90)
        };
        let (history, _) = apply(Vec::new(), 2, r1);
        assert_eq!(history[0].average, None);
    }

    #[test]
    fn store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("averages.json");

        let mut store = AverageStore::load(&path);
        assert!(store.history("A4:C1:38:00:00:01").is_empty());

        store.smooth("A4:C1:38:00:00:01", 3, reading(20.0, 40, 90));
        let out = store.smooth("A4:C1:38:00:00:01", 3, reading(22.0, 42, 90));
        assert_eq!(out.temperature, 21.0);
        store.save().unwrap();

        let reloaded = AverageStore::load(&path);
        assert_eq!(
            reloaded.history("A4:C1:38:00:00:01"),
            vec![reading(22.0, 42, 90), reading(20.0, 40, 90)]
        );
        assert!(!dir.path().join("averages.json.tmp").exists());
    }

    #[test]
    fn smooth_with_zero_window_leaves_store_alone() {
        let mut store = AverageStore::empty("unused.json");
        let r1 = reading(20.0, 40, 90);
        assert_eq!(store.smooth("mac", 0, r1), r1);
        assert!(store.entries.is_empty());
    }

    #[test]
    fn corrupt_store_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("averages.json");
        fs::write(&path, "not json").unwrap();

        let store = AverageStore::load(&path);
        assert!(store.entries.is_empty());
        assert_eq!(store.path(), path.as_path());
    }
}
