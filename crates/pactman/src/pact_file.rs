//! Pact file writing and reading.
//!
//! The consumer side writes an interaction to disk every time the mock
//! consumes it. Within one test session the writer accumulates the
//! session's interactions in memory and rewrites the file; the
//! `file_write_mode` decides what happens to a pre-existing file. Writes
//! are serialised by an in-process lock keyed on the absolute path; the
//! declared usage pattern is one test session per file, so cross-process
//! locking is out of scope.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::PactFormatError;
use crate::interaction::{Interaction, PactDocument, SpecVersion};

/// What to do with an existing pact file for the same consumer/provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileWriteMode {
    /// Truncate on the first write of the session, then rewrite.
    #[default]
    Overwrite,
    /// Keep existing interactions whose descriptions don't collide.
    Merge,
    /// Write nothing.
    Never,
}

#[derive(Debug, Error)]
pub enum PactFileError {
    #[error(transparent)]
    Format(#[from] PactFormatError),
    #[error("failed to write pact file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(
        "interaction {description:?} declares spec version {new} but the pact uses {existing}"
    )]
    SpecVersionMismatch {
        description: String,
        existing: SpecVersion,
        new: SpecVersion,
    },
    #[error("interaction {0:?} already exists with a different request or response")]
    InteractionConflict(String),
}

/// The canonical pact file name: `<consumer>-<provider>.json`, lower-cased,
/// whitespace replaced with underscores.
pub fn pact_filename(dir: &Path, consumer: &str, provider: &str) -> PathBuf {
    dir.join(format!("{}-{}.json", mangle(consumer), mangle(provider)))
}

fn mangle(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Process-wide write locks, keyed by absolute path.
fn file_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let locks = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let key = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    locks.lock().entry(key).or_default().clone()
}

#[derive(Default)]
struct WriterState {
    interactions: Vec<Interaction>,
    version: Option<SpecVersion>,
}

/// Writes a pact file for one (consumer, provider) pair over the lifetime
/// of a test session.
pub struct PactWriter {
    dir: PathBuf,
    path: PathBuf,
    mode: FileWriteMode,
    consumer: String,
    provider: String,
    state: Mutex<WriterState>,
}

impl PactWriter {
    pub fn new(dir: &Path, consumer: &str, provider: &str, mode: FileWriteMode) -> Self {
        PactWriter {
            dir: dir.to_path_buf(),
            path: pact_filename(dir, consumer, provider),
            mode,
            consumer: consumer.to_string(),
            provider: provider.to_string(),
            state: Mutex::new(WriterState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one consumed interaction and rewrite the pact file.
    ///
    /// Re-writing an identical interaction is idempotent; an interaction
    /// whose description and provider states collide with a different one
    /// is a conflict. All interactions of a pact must declare the same
    /// spec version.
    pub fn write_interaction(&self, interaction: &Interaction) -> Result<(), PactFileError> {
        if self.mode == FileWriteMode::Never {
            return Ok(());
        }
        let mut state = self.state.lock();
        if let Some(existing) = state.version {
            if existing != interaction.spec_version {
                return Err(PactFileError::SpecVersionMismatch {
                    description: interaction.description.clone(),
                    existing,
                    new: interaction.spec_version,
                });
            }
        }
        if let Some(existing) = state.interactions.iter().find(|i| {
            i.description == interaction.description
                && i.provider_states == interaction.provider_states
        }) {
            if existing == interaction {
                debug!(
                    "interaction {:?} already recorded, skipping",
                    interaction.description
                );
                return Ok(());
            }
            return Err(PactFileError::InteractionConflict(
                interaction.description.clone(),
            ));
        }
        state.version = Some(interaction.spec_version);
        state.interactions.push(interaction.clone());

        let mut document = PactDocument::new(
            self.consumer.clone(),
            self.provider.clone(),
            interaction.spec_version,
        );

        let lock = file_lock(&self.path);
        let _guard = lock.lock();
        if self.mode == FileWriteMode::Merge && self.path.exists() {
            let existing = load_pact_file(&self.path)?;
            if existing.spec_version != interaction.spec_version {
                return Err(PactFileError::SpecVersionMismatch {
                    description: interaction.description.clone(),
                    existing: existing.spec_version,
                    new: interaction.spec_version,
                });
            }
            // session interactions replace file entries with the same
            // description
            document.interactions = existing
                .interactions
                .into_iter()
                .filter(|i| {
                    !state
                        .interactions
                        .iter()
                        .any(|s| s.description == i.description)
                })
                .collect();
        }
        document.interactions.extend(state.interactions.iter().cloned());

        fs::create_dir_all(&self.dir).map_err(|source| PactFileError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let json = serde_json::to_string_pretty(&document.to_json())
            .map_err(PactFormatError::from)?;
        fs::write(&self.path, json).map_err(|source| PactFileError::Io {
            path: self.path.clone(),
            source,
        })?;
        info!("wrote pact file {}", self.path.display());
        Ok(())
    }
}

/// Load and parse a pact file.
pub fn load_pact_file(path: &Path) -> Result<PactDocument, PactFormatError> {
    let text = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    PactDocument::from_json(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::{ExpectedRequest, ExpectedResponse};
    use serde_json::json;

    fn interaction(description: &str, version: SpecVersion) -> Interaction {
        Interaction {
            description: description.to_string(),
            provider_states: Vec::new(),
            request: ExpectedRequest {
                method: "GET".to_string(),
                path: "/thing".to_string(),
                ..Default::default()
            },
            response: ExpectedResponse {
                status: 200,
                body: Some(json!({"ok": true})),
                ..Default::default()
            },
            spec_version: version,
        }
    }

    #[test]
    fn test_filename_mangling() {
        let path = pact_filename(Path::new("/tmp"), "My Consumer", "Some Provider");
        assert_eq!(
            path,
            PathBuf::from("/tmp/my_consumer-some_provider.json")
        );
    }

    #[test]
    fn test_overwrite_mode_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = pact_filename(dir.path(), "c", "p");
        fs::write(&path, "{\"stale\": true}").unwrap();

        let writer = PactWriter::new(dir.path(), "c", "p", FileWriteMode::Overwrite);
        writer
            .write_interaction(&interaction("first", SpecVersion::V3))
            .unwrap();
        writer
            .write_interaction(&interaction("second", SpecVersion::V3))
            .unwrap();

        let pact = load_pact_file(&path).unwrap();
        assert_eq!(pact.interactions.len(), 2);
        assert_eq!(pact.interactions[0].description, "first");
        assert_eq!(pact.interactions[1].description, "second");
    }

    #[test]
    fn test_merge_mode_keeps_non_colliding_interactions() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PactWriter::new(dir.path(), "c", "p", FileWriteMode::Overwrite);
        writer
            .write_interaction(&interaction("kept", SpecVersion::V3))
            .unwrap();
        writer
            .write_interaction(&interaction("replaced", SpecVersion::V3))
            .unwrap();

        // a second session in merge mode replaces one interaction
        let merger = PactWriter::new(dir.path(), "c", "p", FileWriteMode::Merge);
        let mut updated = interaction("replaced", SpecVersion::V3);
        updated.response.status = 201;
        merger.write_interaction(&updated).unwrap();

        let pact = load_pact_file(merger.path()).unwrap();
        assert_eq!(pact.interactions.len(), 2);
        let replaced = pact
            .interactions
            .iter()
            .find(|i| i.description == "replaced")
            .unwrap();
        assert_eq!(replaced.response.status, 201);
        assert!(pact.interactions.iter().any(|i| i.description == "kept"));
    }

    #[test]
    fn test_never_mode_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PactWriter::new(dir.path(), "c", "p", FileWriteMode::Never);
        writer
            .write_interaction(&interaction("x", SpecVersion::V3))
            .unwrap();
        assert!(!writer.path().exists());
    }

    #[test]
    fn test_spec_version_mix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PactWriter::new(dir.path(), "c", "p", FileWriteMode::Overwrite);
        writer
            .write_interaction(&interaction("a", SpecVersion::V2))
            .unwrap();
        let result = writer.write_interaction(&interaction("b", SpecVersion::V3));
        assert!(matches!(
            result,
            Err(PactFileError::SpecVersionMismatch { .. })
        ));
    }

    #[test]
    fn test_identical_rewrite_is_idempotent_but_conflict_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PactWriter::new(dir.path(), "c", "p", FileWriteMode::Overwrite);
        writer
            .write_interaction(&interaction("a", SpecVersion::V3))
            .unwrap();
        writer
            .write_interaction(&interaction("a", SpecVersion::V3))
            .unwrap();
        let pact = load_pact_file(writer.path()).unwrap();
        assert_eq!(pact.interactions.len(), 1);

        let mut conflicting = interaction("a", SpecVersion::V3);
        conflicting.response.status = 500;
        assert!(matches!(
            writer.write_interaction(&conflicting),
            Err(PactFileError::InteractionConflict(_))
        ));
    }

    #[test]
    fn test_pact_dir_is_created_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("pacts");
        let writer = PactWriter::new(&nested, "c", "p", FileWriteMode::Overwrite);
        writer
            .write_interaction(&interaction("a", SpecVersion::V3))
            .unwrap();
        assert!(writer.path().exists());
    }

    #[test]
    fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PactWriter::new(dir.path(), "Consumer", "Provider", FileWriteMode::Overwrite);
        let original = interaction("round trip", SpecVersion::V2);
        writer.write_interaction(&original).unwrap();
        let pact = load_pact_file(writer.path()).unwrap();
        assert_eq!(pact.consumer, "Consumer");
        assert_eq!(pact.provider, "Provider");
        assert_eq!(pact.interactions, vec![original]);
    }
}
