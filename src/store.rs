//! Loading frame embeddings into a vector store.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};
use crate::vision::{list_frames, FrameDetections, FrameFeatures, FrameFile};

/// One detected object paired with its frame's embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub frame_name: String,
    pub object_class: String,
    pub confidence: f32,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub frame_name: String,
    pub object_class: String,
    pub confidence: f32,
    pub distance: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn insert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Build or refresh the search index after inserts.
    async fn index(&self) -> Result<()>;

    /// Nearest records by L2 distance, closest first.
    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub vector_dim: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            vector_dim: 1000,
        }
    }
}

/// Push every frame's detections and features from `frames_dir` into `store`.
///
/// Returns the number of records inserted.
pub async fn ingest_frames(
    frames_dir: &Path,
    store: &dyn VectorStore,
    config: IngestConfig,
) -> Result<usize> {
    let batch_size = config.batch_size.max(1);
    let frames = list_frames(frames_dir)?;
    let mut batch = Vec::with_capacity(batch_size);
    let mut inserted = 0;

    for frame in &frames {
        let records = match load_records(frame).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Skipping {}: {}", frame.path.display(), e);
                continue;
            }
        };

        for record in records {
            if record.vector.len() != config.vector_dim {
                warn!(
                    "Skipping {} ({}): vector has {} dimensions, expected {}",
                    record.frame_name,
                    record.object_class,
                    record.vector.len(),
                    config.vector_dim
                );
                continue;
            }
            batch.push(record);
            if batch.len() == batch_size {
                inserted += batch.len();
                store.insert(std::mem::take(&mut batch)).await?;
                debug!("Inserted batch, {} records so far", inserted);
            }
        }
    }

    if !batch.is_empty() {
        inserted += batch.len();
        store.insert(batch).await?;
    }

    store.index().await?;
    info!(
        "Ingested {} records from {} frames in {}",
        inserted,
        frames.len(),
        frames_dir.display()
    );
    Ok(inserted)
}

async fn load_records(frame: &FrameFile) -> Result<Vec<VectorRecord>> {
    let features: FrameFeatures =
        serde_json::from_slice(&tokio::fs::read(frame.features_path()).await?)?;
    let detections: FrameDetections =
        serde_json::from_slice(&tokio::fs::read(frame.detections_path()).await?)?;

    Ok(detections
        .detections
        .into_iter()
        .map(|d| VectorRecord {
            frame_name: detections.frame.clone(),
            object_class: d.name,
            confidence: d.confidence,
            vector: features.features.clone(),
        })
        .collect())
}

/// Brute-force store for tests and small runs.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    records: RwLock<Vec<VectorRecord>>,
    dim: Option<usize>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject inserts whose vectors are not `dim` long.
    pub fn with_dim(dim: usize) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            dim: Some(dim),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert(&self, records: Vec<VectorRecord>) -> Result<()> {
        if let Some(dim) = self.dim {
            if let Some(bad) = records.iter().find(|r| r.vector.len() != dim) {
                return Err(IngestError::Config(format!(
                    "vector for {} has {} dimensions, store expects {}",
                    bad.frame_name,
                    bad.vector.len(),
                    dim
                )));
            }
        }
        self.records.write().await.extend(records);
        Ok(())
    }

    async fn index(&self) -> Result<()> {
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let records = self.records.read().await;
        let mut hits: Vec<SearchHit> = records
            .iter()
            .filter(|r| r.vector.len() == query.len())
            .map(|r| SearchHit {
                frame_name: r.frame_name.clone(),
                object_class: r.object_class.clone(),
                confidence: r.confidence,
                distance: l2_distance(&r.vector, query),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        Ok(hits)
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::tests::{write_frame, FixedDetector, MeanColorExtractor};
    use crate::vision::run_vision;
    use std::sync::Mutex;

    /// Records the size of every insert call.
    #[derive(Default)]
    struct CountingStore {
        batches: Mutex<Vec<usize>>,
        indexed: Mutex<usize>,
    }

    #[async_trait]
    impl VectorStore for CountingStore {
        async fn insert(&self, records: Vec<VectorRecord>) -> Result<()> {
            self.batches.lock().unwrap().push(records.len());
            Ok(())
        }

        async fn index(&self) -> Result<()> {
            *self.indexed.lock().unwrap() += 1;
            Ok(())
        }

        async fn search(&self, _query: &[f32], _top_k: usize) -> Result<Vec<SearchHit>> {
            Ok(Vec::new())
        }
    }

    fn record(name: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            frame_name: name.to_string(),
            object_class: "person".to_string(),
            confidence: 0.5,
            vector,
        }
    }

    #[tokio::test]
    async fn test_ingest_batches_and_indexes_once() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write_frame(dir.path(), i, 50);
        }
        run_vision(dir.path(), &FixedDetector, &MeanColorExtractor { dim: 4 }).unwrap();

        let store = CountingStore::default();
        let config = IngestConfig {
            batch_size: 2,
            vector_dim: 4,
        };
        let count = ingest_frames(dir.path(), &store, config).await.unwrap();

        assert_eq!(count, 5);
        assert_eq!(*store.batches.lock().unwrap(), vec![2, 2, 1]);
        assert_eq!(*store.indexed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), 0, 50);
        run_vision(dir.path(), &FixedDetector, &MeanColorExtractor { dim: 3 }).unwrap();

        let store = InMemoryVectorStore::new();
        let count = ingest_frames(dir.path(), &store, IngestConfig::default())
            .await
            .unwrap();

        assert_eq!(count, 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_frame_without_sidecars_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), 0, 50);
        run_vision(dir.path(), &FixedDetector, &MeanColorExtractor { dim: 2 }).unwrap();
        write_frame(dir.path(), 30, 50);

        let store = InMemoryVectorStore::with_dim(2);
        let config = IngestConfig {
            batch_size: 10,
            vector_dim: 2,
        };
        let count = ingest_frames(dir.path(), &store, config).await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_search_orders_by_distance() {
        let store = InMemoryVectorStore::new();
        store
            .insert(vec![
                record("far", vec![10.0, 10.0]),
                record("near", vec![1.0, 0.0]),
                record("exact", vec![0.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.search(&[0.0, 0.0], 2).await.unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.frame_name.as_str()).collect();
        assert_eq!(names, vec!["exact", "near"]);
        assert_eq!(hits[1].distance, 1.0);
    }

    #[tokio::test]
    async fn test_store_dimension_is_enforced() {
        let store = InMemoryVectorStore::with_dim(3);
        let result = store.insert(vec![record("frame_0.jpg", vec![1.0])]).await;
        assert!(matches!(result, Err(IngestError::Config(_))));
    }
}
