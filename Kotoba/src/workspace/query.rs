//! Read-only views: progress reports and text search

use std::collections::BTreeMap;

use serde::Serialize;

use super::asset::{AssetId, Entry, Status};
use super::store::State;

/// Entry counts for one asset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub untranslated: usize,
    pub machine_filled: usize,
    pub manual: usize,
    pub reviewed: usize,
    pub orphaned: usize,
}

impl StatusCounts {
    fn add(&mut self, entry: &Entry) {
        if entry.orphaned {
            self.orphaned += 1;
            return;
        }
        match entry.status {
            Status::Untranslated => self.untranslated += 1,
            Status::MachineFilled => self.machine_filled += 1,
            Status::Manual => self.manual += 1,
            Status::Reviewed => self.reviewed += 1,
        }
    }

    fn absorb(&mut self, other: &StatusCounts) {
        self.untranslated += other.untranslated;
        self.machine_filled += other.machine_filled;
        self.manual += other.manual;
        self.reviewed += other.reviewed;
        self.orphaned += other.orphaned;
    }

    /// Live (non-orphaned) entries
    #[must_use]
    pub fn total(&self) -> usize {
        self.untranslated + self.machine_filled + self.manual + self.reviewed
    }

    /// Share of live entries with any translation, 0.0 to 1.0
    #[must_use]
    pub fn progress(&self) -> f64 {
        match self.total() {
            0 => 1.0,
            total => (total - self.untranslated) as f64 / total as f64,
        }
    }
}

/// Progress across the workspace
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusReport {
    pub assets: BTreeMap<String, StatusCounts>,
    pub total: StatusCounts,
}

impl StatusReport {
    /// Count entries by status, optionally for one asset only
    #[must_use]
    pub fn from_state(state: &State, asset: Option<&AssetId>) -> Self {
        let mut report = Self::default();
        for (id, file) in &state.assets {
            if asset.is_some_and(|wanted| wanted != id) {
                continue;
            }
            let mut counts = StatusCounts::default();
            for entry in &file.entries {
                counts.add(entry);
            }
            report.total.absorb(&counts);
            report.assets.insert(id.to_string(), counts);
        }
        report
    }

    /// Assets that still have untranslated entries
    pub fn incomplete(&self) -> impl Iterator<Item = (&str, &StatusCounts)> {
        self.assets
            .iter()
            .filter(|(_, counts)| counts.untranslated > 0)
            .map(|(id, counts)| (id.as_str(), counts))
    }
}

/// Options for [`find`]
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub case_sensitive: bool,
    /// Also search translated text
    pub include_translations: bool,
    /// Stop after this many matches
    pub limit: Option<usize>,
}

/// Entries whose source (or translation) contains `needle`
#[must_use]
pub fn find<'s>(state: &'s State, needle: &str, options: &FindOptions) -> Vec<&'s Entry> {
    let folded = if options.case_sensitive {
        needle.to_string()
    } else {
        needle.to_lowercase()
    };
    let matches = |text: &str| {
        if options.case_sensitive {
            text.contains(&folded)
        } else {
            text.to_lowercase().contains(&folded)
        }
    };

    let hits = state.entries().filter(|entry| {
        matches(&entry.source_text)
            || (options.include_translations && matches(&entry.translated_text))
    });
    match options.limit {
        Some(limit) => hits.take(limit).collect(),
        None => hits.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::AssetFile;

    fn state() -> State {
        let id = AssetId::table("text");
        let mut file = AssetFile::new(id.clone(), String::new());
        file.entries.push(Entry::new(id.clone(), "1/text", "Special Week"));
        let mut done = Entry::new(id.clone(), "2/text", "Silence Suzuka");
        done.translated_text = "Silence Suzuka".into();
        done.status = Status::Reviewed;
        file.entries.push(done);
        let mut gone = Entry::new(id.clone(), "3/text", "Old line");
        gone.orphaned = true;
        file.entries.push(gone);

        let mut state = State::default();
        state.assets.insert(id, file);
        state
    }

    #[test]
    fn test_status_counts() {
        let report = StatusReport::from_state(&state(), None);
        assert_eq!(report.total.untranslated, 1);
        assert_eq!(report.total.reviewed, 1);
        assert_eq!(report.total.orphaned, 1);
        assert!((report.total.progress() - 0.5).abs() < f64::EPSILON);
        assert_eq!(report.incomplete().count(), 1);
    }

    #[test]
    fn test_find_case_insensitive() {
        let state = state();
        let hits = find(&state, "special", &FindOptions::default());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].field_path, "1/text");

        let strict = FindOptions {
            case_sensitive: true,
            ..FindOptions::default()
        };
        assert!(find(&state, "special", &strict).is_empty());
    }
}
