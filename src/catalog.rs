//! Chord catalog.
//!
//! The catalog maps chord identifiers to their reference embedding, fingering
//! and MIDI notes. It is built once (from the built-in table or a JSON file),
//! never mutated afterwards, and replaced wholesale on reload.
//!
//! Reference embeddings that are not supplied explicitly are derived from the
//! chord identifier alone (see [`reference_embedding`]), so the same identifier
//! yields the same bits in every process.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::hash::Hasher;
use std::path::{Path, PathBuf};

use fxhash::FxHasher64;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::projection::{Embedding, Projector, l2_normalize_in_place};
use crate::sanitize::FEATURE_DIM;

/// Guitar strings per fingering, low E to high e.
pub const STRING_COUNT: usize = 6;
/// Fret value for a string that is not played.
pub const MUTED: i8 = -1;
/// Highest fret accepted in a fingering.
pub const MAX_FRET: i8 = 24;
/// Highest valid MIDI note number.
pub const MAX_MIDI_NOTE: u8 = 127;

/// Leading reference components nudged by chord category.
const CATEGORY_PREFIX: usize = 10;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("chord not found: {0}")]
    NotFound(String),
    #[error("duplicate chord id: {0}")]
    Duplicate(String),
    #[error("invalid fingering: {0}")]
    InvalidFingering(String),
    #[error("invalid chord '{chord_id}': {reason}")]
    InvalidEntry { chord_id: String, reason: String },
    #[error("chord '{chord_id}' has a {actual}-D embedding, catalog expects {expected}")]
    DimensionMismatch {
        chord_id: String,
        expected: usize,
        actual: usize,
    },
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Six fret positions, one per string; `-1` mutes the string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<i64>", into = "Vec<i8>")]
pub struct Fingering([i8; STRING_COUNT]);

impl Fingering {
    /// All strings open; used by the unknown-chord outcome.
    pub const NEUTRAL: Fingering = Fingering([0; STRING_COUNT]);

    pub fn new(frets: [i8; STRING_COUNT]) -> Result<Self, CatalogError> {
        if let Some((string, fret)) = frets
            .iter()
            .enumerate()
            .find(|&(_, &f)| !(MUTED..=MAX_FRET).contains(&f))
        {
            return Err(CatalogError::InvalidFingering(format!(
                "string {string} has fret {fret}, expected [{MUTED}, {MAX_FRET}]"
            )));
        }
        Ok(Self(frets))
    }

    pub fn frets(&self) -> &[i8; STRING_COUNT] {
        &self.0
    }
}

impl TryFrom<Vec<i64>> for Fingering {
    type Error = CatalogError;

    fn try_from(values: Vec<i64>) -> Result<Self, Self::Error> {
        if values.len() != STRING_COUNT {
            return Err(CatalogError::InvalidFingering(format!(
                "expected {STRING_COUNT} frets, got {}",
                values.len()
            )));
        }
        let mut frets = [0i8; STRING_COUNT];
        for (slot, &value) in frets.iter_mut().zip(&values) {
            *slot = i8::try_from(value).map_err(|_| {
                CatalogError::InvalidFingering(format!("fret {value} out of range"))
            })?;
        }
        Fingering::new(frets)
    }
}

impl From<Fingering> for Vec<i8> {
    fn from(f: Fingering) -> Self {
        f.0.to_vec()
    }
}

/// Harmonic family of a chord.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChordCategory {
    Major,
    Minor,
    Seventh,
    Diminished,
    Augmented,
    Other,
}

impl ChordCategory {
    /// Offset applied to the leading reference components, so chords of the
    /// same family cluster together.
    fn reference_shift(self) -> f32 {
        match self {
            ChordCategory::Major => 0.5,
            ChordCategory::Minor => -0.5,
            _ => 0.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChordCategory::Major => "major",
            ChordCategory::Minor => "minor",
            ChordCategory::Seventh => "seventh",
            ChordCategory::Diminished => "diminished",
            ChordCategory::Augmented => "augmented",
            ChordCategory::Other => "other",
        }
    }
}

impl fmt::Display for ChordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chord as stored in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordEntry {
    pub chord_id: String,
    pub fingering: Fingering,
    pub midi_notes: Vec<u8>,
    pub category: ChordCategory,
    pub embedding: Embedding,
}

/// On-disk description of a chord. `embedding` is optional and, when
/// present, must already live in the projector's output space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChordDefinition {
    pub chord_id: String,
    pub fingering: Fingering,
    pub midi_notes: Vec<u8>,
    pub category: ChordCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

type BuiltinChord = (&'static str, [i8; STRING_COUNT], &'static [u8], ChordCategory);

const BUILTIN_CHORDS: &[BuiltinChord] = &[
    ("C_Major", [0, 3, 2, 0, 1, 0], &[48, 52, 55, 60, 64, 67], ChordCategory::Major),
    ("C_Minor", [3, 3, 5, 5, 4, 3], &[48, 51, 55, 60, 63, 67], ChordCategory::Minor),
    ("D_Major", [-1, -1, 0, 2, 3, 2], &[50, 54, 57, 62, 66, 69], ChordCategory::Major),
    ("D_Minor", [-1, -1, 0, 2, 3, 1], &[50, 53, 57, 62, 65, 69], ChordCategory::Minor),
    ("E_Major", [0, 2, 2, 1, 0, 0], &[40, 47, 52, 56, 59, 64], ChordCategory::Major),
    ("E_Minor", [0, 2, 2, 0, 0, 0], &[40, 47, 52, 55, 59, 64], ChordCategory::Minor),
    ("F_Major", [1, 3, 3, 2, 1, 1], &[41, 48, 53, 57, 60, 65], ChordCategory::Major),
    ("G_Major", [3, 2, 0, 0, 0, 3], &[43, 47, 50, 55, 59, 67], ChordCategory::Major),
    ("G_Minor", [3, 5, 5, 3, 3, 3], &[43, 46, 50, 55, 58, 67], ChordCategory::Minor),
    ("A_Major", [0, 0, 2, 2, 2, 0], &[45, 52, 57, 61, 64, 69], ChordCategory::Major),
    ("A_Minor", [0, 0, 2, 2, 1, 0], &[45, 52, 57, 60, 64, 69], ChordCategory::Minor),
    ("B_Major", [-1, 2, 4, 4, 4, 2], &[47, 54, 59, 63, 66, 71], ChordCategory::Major),
    ("B_Minor", [-1, 2, 4, 4, 3, 2], &[47, 54, 59, 62, 66, 71], ChordCategory::Minor),
    ("B_Seventh", [-1, 2, 1, 2, 0, 2], &[47, 51, 57, 59, 66], ChordCategory::Seventh),
    ("C_Seventh", [-1, 3, 2, 3, 1, 0], &[48, 52, 58, 60, 64], ChordCategory::Seventh),
    ("G_Seventh", [3, 2, 0, 0, 0, 1], &[43, 47, 50, 55, 59, 65], ChordCategory::Seventh),
];

/// Definitions of the chords shipped with the service.
pub fn builtin_definitions() -> Vec<ChordDefinition> {
    BUILTIN_CHORDS
        .iter()
        .map(|&(chord_id, frets, notes, category)| ChordDefinition {
            chord_id: chord_id.to_string(),
            fingering: Fingering(frets),
            midi_notes: notes.to_vec(),
            category,
            embedding: None,
        })
        .collect()
}

/// Standard normal draws via the polar Box-Muller method.
struct GaussianStream {
    rng: ChaCha8Rng,
    spare: Option<f64>,
}

impl GaussianStream {
    fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            spare: None,
        }
    }

    fn next(&mut self) -> f64 {
        if let Some(spare) = self.spare.take() {
            return spare;
        }
        loop {
            let u = 2.0 * self.rng.random::<f64>() - 1.0;
            let v = 2.0 * self.rng.random::<f64>() - 1.0;
            let s = u * u + v * v;
            if s > 0.0 && s < 1.0 {
                let factor = (-2.0 * s.ln() / s).sqrt();
                self.spare = Some(u * factor);
                return v * factor;
            }
        }
    }
}

/// 64-bit FxHash of the identifier, fed as its length followed by
/// zero-padded little-endian words so the seed is the same on every target.
fn reference_seed(chord_id: &str) -> u64 {
    let bytes = chord_id.as_bytes();
    let mut hasher = FxHasher64::default();
    hasher.write_u64(bytes.len() as u64);
    for chunk in bytes.chunks(8) {
        let mut word = [0u8; 8];
        word[..chunk.len()].copy_from_slice(chunk);
        hasher.write_u64(u64::from_le_bytes(word));
    }
    hasher.finish()
}

/// Deterministic 63-D reference vector for `chord_id`, L2-normalized.
pub fn reference_embedding(chord_id: &str, category: ChordCategory) -> Vec<f32> {
    let mut gauss = GaussianStream::new(reference_seed(chord_id));
    let mut values: Vec<f32> = (0..FEATURE_DIM).map(|_| gauss.next() as f32).collect();

    let shift = category.reference_shift();
    for v in values.iter_mut().take(CATEGORY_PREFIX) {
        *v += shift;
    }

    l2_normalize_in_place(&mut values);
    values
}

/// Where the catalog is loaded from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CatalogSource {
    #[default]
    Builtin,
    File(PathBuf),
}

impl CatalogSource {
    pub fn from_path(path: Option<&Path>) -> Self {
        path.map_or(CatalogSource::Builtin, |p| CatalogSource::File(p.to_path_buf()))
    }
}

/// Immutable, insertion-ordered chord table.
#[derive(Debug, Clone)]
pub struct ChordCatalog {
    entries: Vec<ChordEntry>,
    positions: HashMap<String, usize>,
    dim: usize,
}

impl ChordCatalog {
    /// Load the catalog from `source`, embedding every chord with `projector`.
    pub fn load(source: &CatalogSource, projector: &Projector) -> Result<Self, CatalogError> {
        match source {
            CatalogSource::Builtin => Self::builtin(projector),
            CatalogSource::File(path) => Self::from_json_file(path, projector),
        }
    }

    pub fn builtin(projector: &Projector) -> Result<Self, CatalogError> {
        Self::from_definitions(builtin_definitions(), projector)
    }

    /// Load a JSON array of [`ChordDefinition`]s.
    pub fn from_json_file<P: AsRef<Path>>(
        path: P,
        projector: &Projector,
    ) -> Result<Self, CatalogError> {
        let content = fs::read_to_string(path)?;
        let definitions: Vec<ChordDefinition> = serde_json::from_str(&content)?;
        Self::from_definitions(definitions, projector)
    }

    pub fn from_definitions(
        definitions: Vec<ChordDefinition>,
        projector: &Projector,
    ) -> Result<Self, CatalogError> {
        let dim = projector.output_dim();
        let mut entries = Vec::with_capacity(definitions.len());

        for def in definitions {
            let embedding = match def.embedding {
                Some(values) => {
                    if values.iter().any(|v| !v.is_finite()) {
                        return Err(CatalogError::InvalidEntry {
                            chord_id: def.chord_id,
                            reason: "embedding contains non-finite values".into(),
                        });
                    }
                    Embedding::normalized(values)
                }
                None => {
                    let reference = reference_embedding(&def.chord_id, def.category);
                    projector
                        .project(&reference)
                        .map_err(|e| CatalogError::InvalidEntry {
                            chord_id: def.chord_id.clone(),
                            reason: e.to_string(),
                        })?
                }
            };

            entries.push(ChordEntry {
                chord_id: def.chord_id,
                fingering: def.fingering,
                midi_notes: def.midi_notes,
                category: def.category,
                embedding,
            });
        }

        Self::from_entries(entries, dim)
    }

    /// Build from fully formed entries; every embedding must be `dim` wide.
    pub fn from_entries(entries: Vec<ChordEntry>, dim: usize) -> Result<Self, CatalogError> {
        let mut positions = HashMap::with_capacity(entries.len());

        for (idx, entry) in entries.iter().enumerate() {
            if entry.chord_id.trim().is_empty() {
                return Err(CatalogError::InvalidEntry {
                    chord_id: entry.chord_id.clone(),
                    reason: "chord id must not be empty".into(),
                });
            }
            if entry.embedding.dim() != dim {
                return Err(CatalogError::DimensionMismatch {
                    chord_id: entry.chord_id.clone(),
                    expected: dim,
                    actual: entry.embedding.dim(),
                });
            }
            if let Some(note) = entry.midi_notes.iter().find(|&&n| n > MAX_MIDI_NOTE) {
                return Err(CatalogError::InvalidEntry {
                    chord_id: entry.chord_id.clone(),
                    reason: format!("MIDI note {note} above {MAX_MIDI_NOTE}"),
                });
            }
            if positions.insert(entry.chord_id.clone(), idx).is_some() {
                return Err(CatalogError::Duplicate(entry.chord_id.clone()));
            }
        }

        Ok(Self {
            entries,
            positions,
            dim,
        })
    }

    pub fn lookup(&self, chord_id: &str) -> Result<&ChordEntry, CatalogError> {
        self.get(chord_id)
            .ok_or_else(|| CatalogError::NotFound(chord_id.to_string()))
    }

    pub fn get(&self, chord_id: &str) -> Option<&ChordEntry> {
        self.positions.get(chord_id).map(|&idx| &self.entries[idx])
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ChordEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding dimensionality shared by all entries.
    pub fn dim(&self) -> usize {
        self.dim
    }
}
