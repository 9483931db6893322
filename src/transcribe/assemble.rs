use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::artifact::write_json;
use crate::classify::Classification;
use crate::error::{IngestError, Result};

use super::TranscriptEntry;

/// File name of the full transcript inside an upload's audio directory.
pub const TRANSCRIPT_FILE_NAME: &str = "transcript.json";

/// Slack allowed when comparing adjacent entry boundaries.
const BOUNDARY_TOLERANCE: f64 = 1e-6;

/// Time-ordered, gap-free record of every span of the audio track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    pub entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.entries.last().map(|e| e.end).unwrap_or(0.0)
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.entries
            .iter()
            .filter(|e| e.classification == classification)
            .count()
    }

    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|e| e.error.is_some()).count()
    }

    /// Recognized speech joined with spaces.
    pub fn text(&self) -> String {
        self.entries
            .iter()
            .filter(|e| !e.text.is_empty())
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Persists per-chunk entries as they complete and the full transcript once
/// all chunks are done.
#[derive(Debug, Clone)]
pub struct TranscriptAssembler {
    output_dir: PathBuf,
}

impl TranscriptAssembler {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn entry_path(&self, ordinal: usize) -> PathBuf {
        self.output_dir.join(format!("chunk{ordinal}.json"))
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.output_dir.join(TRANSCRIPT_FILE_NAME)
    }

    pub fn persist_entry(&self, ordinal: usize, entry: &TranscriptEntry) -> Result<PathBuf> {
        let path = self.entry_path(ordinal);
        write_json(&path, entry)?;
        debug!("Saved chunk {} entry to {}", ordinal, path.display());
        Ok(path)
    }

    /// Check contiguity and write the transcript. Entries are never reordered.
    pub fn assemble(&self, entries: Vec<TranscriptEntry>) -> Result<Transcript> {
        validate(&entries)?;
        let transcript = Transcript { entries };
        write_json(&self.transcript_path(), &transcript)?;
        info!(
            "Saved transcript with {} entries to {}",
            transcript.len(),
            self.transcript_path().display()
        );
        Ok(transcript)
    }
}

fn validate(entries: &[TranscriptEntry]) -> Result<()> {
    if let Some(first) = entries.first() {
        if first.start.abs() > BOUNDARY_TOLERANCE {
            return Err(IngestError::AssemblyInvariant {
                index: 0,
                message: format!("first entry starts at {} instead of 0", first.start),
            });
        }
    }

    for (index, entry) in entries.iter().enumerate() {
        if entry.end < entry.start {
            return Err(IngestError::AssemblyInvariant {
                index,
                message: format!("ends at {} before it starts at {}", entry.end, entry.start),
            });
        }
    }

    for (i, pair) in entries.windows(2).enumerate() {
        let gap = pair[1].start - pair[0].end;
        if gap.abs() > BOUNDARY_TOLERANCE {
            let kind = if gap > 0.0 { "gap" } else { "overlap" };
            return Err(IngestError::AssemblyInvariant {
                index: i + 1,
                message: format!(
                    "{kind} of {:.6}s after previous entry ending at {}",
                    gap.abs(),
                    pair[0].end
                ),
            });
        }
    }

    Ok(())
}
