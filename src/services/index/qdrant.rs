//! Qdrant index backend.
//!
//! Each `insert_all` writes into a fresh physical collection and only switches searches
//! over to it once every point is stored. The previous collection is then dropped, and
//! `close` drops the active one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointStruct, ScoredPoint, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{Index, validate_entries};
use crate::error::IndexError;
use crate::models::{Chunk, IndexConfig, IndexEntry, ScoredChunk};

/// Extra candidates fetched so equal scores at the k-th position can be re-ranked by id.
/// The window is widened while the last candidate still ties with the k-th.
const TIE_MARGIN: u64 = 8;

const UPSERT_BATCH: usize = 256;

struct Active {
    collection: String,
    dimension: usize,
    points: usize,
}

pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    embedding_dim: u64,
    active: RwLock<Option<Active>>,
    build_lock: Mutex<()>,
    builds: AtomicU64,
}

impl QdrantIndex {
    pub fn new(config: &IndexConfig, embedding_dim: u64) -> Result<Self, IndexError> {
        let mut builder = Qdrant::from_url(&config.url);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| IndexError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            collection: config.collection.clone(),
            embedding_dim,
            active: RwLock::new(None),
            build_lock: Mutex::new(()),
            builds: AtomicU64::new(0),
        })
    }

    fn next_collection_name(&self) -> String {
        let n = self.builds.fetch_add(1, Ordering::SeqCst);
        format!("{}_{}_{}", self.collection, std::process::id(), n)
    }

    async fn create_collection(&self, name: &str, dimension: u64) -> Result<(), IndexError> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| IndexError::CollectionError(e.to_string()))?;
        if exists {
            self.drop_collection(name).await?;
        }

        let create = CreateCollectionBuilder::new(name)
            .vectors_config(VectorParamsBuilder::new(dimension, Distance::Cosine));

        self.client
            .create_collection(create)
            .await
            .map_err(|e| IndexError::CollectionError(e.to_string()))?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<(), IndexError> {
        self.client
            .delete_collection(name)
            .await
            .map(|_| ())
            .map_err(|e| IndexError::CollectionError(e.to_string()))
    }

    async fn upsert(&self, name: &str, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let mut points: Vec<PointStruct> = entries.into_iter().map(to_point).collect();

        while !points.is_empty() {
            let rest = points.split_off(points.len().min(UPSERT_BATCH));
            let batch = std::mem::replace(&mut points, rest);
            let upsert = UpsertPointsBuilder::new(name, batch).wait(true);
            self.client
                .upsert_points(upsert)
                .await
                .map_err(|e| IndexError::UpsertError(e.to_string()))?;
        }
        Ok(())
    }
}

fn to_point(entry: IndexEntry) -> PointStruct {
    let mut payload: HashMap<String, Value> = HashMap::new();
    payload.insert("chunk_id".to_string(), i64::from(entry.chunk.id).into());
    payload.insert("text".to_string(), entry.chunk.text.into());
    payload.insert(
        "source_offset".to_string(),
        (entry.chunk.source_offset as i64).into(),
    );
    if let Some(page) = entry.chunk.page {
        payload.insert("page".to_string(), i64::from(page).into());
    }

    PointStruct::new(u64::from(entry.chunk.id), entry.embedding, payload)
}

/// Converts search hits, skipping (and logging) points that carry no chunk id.
fn usable_chunks(collection: &str, points: Vec<ScoredPoint>) -> Vec<ScoredChunk> {
    points
        .into_iter()
        .filter_map(|point| {
            let id = point.id.clone();
            let chunk = from_point(point);
            if chunk.is_none() {
                warn!(collection, point = ?id, "skipping point without a chunk id");
            }
            chunk
        })
        .collect()
}

/// True when a full window ends on the same score as the k-th candidate, so more
/// points with that score may sit outside it.
fn ties_past_window(candidates: &[ScoredChunk], k: usize, limit: u64) -> bool {
    if (candidates.len() as u64) < limit || k == 0 {
        return false;
    }
    match (candidates.get(k - 1), candidates.last()) {
        (Some(kth), Some(last)) => last.score >= kth.score,
        _ => false,
    }
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn payload_int(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(n)) => Some(*n),
        _ => None,
    }
}

fn from_point(point: ScoredPoint) -> Option<ScoredChunk> {
    let id = match point.id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Num(n)) => u32::try_from(n).ok()?,
        _ => payload_int(&point.payload, "chunk_id").and_then(|n| u32::try_from(n).ok())?,
    };

    let chunk = Chunk {
        id,
        text: payload_str(&point.payload, "text").unwrap_or_default(),
        source_offset: payload_int(&point.payload, "source_offset")
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0),
        page: payload_int(&point.payload, "page").and_then(|n| u32::try_from(n).ok()),
    };

    Some(ScoredChunk {
        chunk,
        score: point.score,
    })
}

#[async_trait]
impl Index for QdrantIndex {
    async fn insert_all(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let dimension = validate_entries(&entries)?;
        if dimension as u64 != self.embedding_dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.embedding_dim as usize,
                actual: dimension,
            });
        }

        let _build = self.build_lock.lock().await;
        let name = self.next_collection_name();
        let points = entries.len();
        debug!(collection = %name, points, "creating qdrant collection");

        self.create_collection(&name, self.embedding_dim).await?;
        if let Err(e) = self.upsert(&name, entries).await {
            if let Err(cleanup) = self.drop_collection(&name).await {
                warn!(collection = %name, error = %cleanup, "failed to drop partial collection");
            }
            return Err(e);
        }

        let previous = self.active.write().await.replace(Active {
            collection: name,
            dimension,
            points,
        });

        if let Some(old) = previous
            && let Err(e) = self.drop_collection(&old.collection).await
        {
            warn!(collection = %old.collection, error = %e, "failed to drop replaced collection");
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let guard = self.active.read().await;
        let active = guard.as_ref().ok_or(IndexError::Empty)?;

        if query.len() != active.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: active.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let total = active.points as u64;
        let mut limit = (k as u64 + TIE_MARGIN).min(total);
        let mut results = loop {
            let search = SearchPointsBuilder::new(&active.collection, query.to_vec(), limit)
                .with_payload(true);

            let response = self
                .client
                .search_points(search)
                .await
                .map_err(|e| IndexError::SearchError(e.to_string()))?;

            let mut candidates = usable_chunks(&active.collection, response.result);
            candidates.sort_by(ScoredChunk::rank_order);

            if limit >= total || !ties_past_window(&candidates, k, limit) {
                break candidates;
            }
            debug!(limit, "widening qdrant search past tied scores");
            limit = (limit * 2).min(total);
        };

        results.truncate(k);
        Ok(results)
    }

    async fn len(&self) -> Result<usize, IndexError> {
        Ok(self.active.read().await.as_ref().map_or(0, |a| a.points))
    }

    async fn close(&self) -> Result<(), IndexError> {
        let _build = self.build_lock.lock().await;
        let Some(active) = self.active.write().await.take() else {
            return Ok(());
        };
        debug!(collection = %active.collection, "dropping qdrant collection");
        self.drop_collection(&active.collection).await
    }

    async fn health_check(&self) -> Result<bool, IndexError> {
        self.client
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| IndexError::ConnectionError(e.to_string()))
    }

    fn backend(&self) -> &'static str {
        "qdrant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::PointId;

    fn config() -> IndexConfig {
        IndexConfig {
            collection: "docqa_test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_does_not_connect() {
        let index = QdrantIndex::new(&config(), 384).unwrap();
        assert_eq!(index.backend(), "qdrant");
    }

    #[test]
    fn test_collection_names_are_unique() {
        let index = QdrantIndex::new(&config(), 384).unwrap();
        let a = index.next_collection_name();
        let b = index.next_collection_name();
        assert_ne!(a, b);
        assert!(a.starts_with("docqa_test_"));
    }

    #[tokio::test]
    async fn test_search_before_insert_is_empty() {
        let index = QdrantIndex::new(&config(), 2).unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0], 2).await,
            Err(IndexError::Empty)
        ));
        assert_eq!(index.len().await.unwrap(), 0);
    }

    fn scored(id: u32, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id,
                text: String::new(),
                source_offset: 0,
                page: None,
            },
            score,
        }
    }

    #[test]
    fn test_ties_past_window() {
        let tied = vec![scored(0, 0.9), scored(1, 0.5), scored(2, 0.5), scored(3, 0.5)];
        assert!(ties_past_window(&tied, 2, 4));
        // short page: qdrant had nothing more to return
        assert!(!ties_past_window(&tied, 2, 5));

        let separated = vec![scored(0, 0.9), scored(1, 0.5), scored(2, 0.5), scored(3, 0.4)];
        assert!(!ties_past_window(&separated, 2, 4));
        assert!(!ties_past_window(&separated, 0, 4));
    }

    #[tokio::test]
    async fn test_close_without_build_is_noop() {
        let index = QdrantIndex::new(&config(), 2).unwrap();
        index.close().await.unwrap();
        assert!(matches!(index.search(&[1.0, 0.0], 1).await, Err(IndexError::Empty)));
    }

    #[test]
    fn test_points_without_chunk_id_are_skipped() {
        let good = ScoredPoint {
            id: Some(PointId::from(3u64)),
            score: 0.8,
            ..Default::default()
        };
        let anonymous = ScoredPoint {
            score: 0.9,
            ..Default::default()
        };
        let chunks = usable_chunks("docqa_test_1", vec![anonymous, good]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk.id, 3);
    }

    #[test]
    fn test_point_payload_round_trip() {
        let point = to_point(IndexEntry {
            chunk: Chunk {
                id: 7,
                text: "seven".to_string(),
                source_offset: 4200,
                page: Some(3),
            },
            embedding: vec![0.1, 0.2],
        });

        let scored = ScoredPoint {
            id: Some(PointId::from(7u64)),
            payload: point.payload,
            score: 0.5,
            ..Default::default()
        };
        let chunk = from_point(scored).unwrap();
        assert_eq!(chunk.chunk.id, 7);
        assert_eq!(chunk.chunk.text, "seven");
        assert_eq!(chunk.chunk.source_offset, 4200);
        assert_eq!(chunk.chunk.page, Some(3));
        assert_eq!(chunk.score, 0.5);
    }
}
