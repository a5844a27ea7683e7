//! Qdrant Edge backed vector index

use std::collections::HashMap;
use std::path::Path;

use edge::EdgeShard;
use segment::data_types::vectors::{NamedQuery, VectorInternal, VectorStructInternal};
use segment::types::{
    Distance, ExtendedPointId, HnswConfig, Indexes, PayloadStorageType, SearchParams,
    SegmentConfig, VectorDataConfig, VectorStorageType, WithPayloadInterface, WithVector,
};
use shard::count::CountRequestInternal;
use shard::operations::CollectionUpdateOperations;
use shard::operations::point_ops::{
    PointInsertOperationsInternal, PointOperations, PointStructPersisted,
};
use shard::query::query_enum::QueryEnum;
use shard::query::{ScoringQuery, ShardQueryRequest};

use crate::{
    LgrepError, Result,
    config::AnnConfig,
    vector::{VectorIndex, check_dimension},
};

/// Vector name used in the shard
const VECTOR_NAME: &str = "chunks";

/// Below this many kilobytes of vectors the engine scans instead of walking the graph
const FULL_SCAN_THRESHOLD_KB: usize = 10_000;

/// ANN index stored as a Qdrant Edge shard with an HNSW vector index.
///
/// Points carry no payload; their numeric id is the chunk id.
/// `m` and `ef_construct` shape the graph the engine builds; `ef_search` is
/// sent with every query.
pub struct EdgeIndex {
    shard: EdgeShard,
    dimension: usize,
    ef_search: usize,
    next_id: u64,
}

impl EdgeIndex {
    /// Load the shard at `path`, creating an empty one if it does not exist.
    pub fn open_or_create(path: &Path, dimension: usize, ann: &AnnConfig) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut vector_data = HashMap::new();
        vector_data.insert(
            VECTOR_NAME.to_string(),
            VectorDataConfig {
                size: dimension,
                distance: Distance::Cosine,
                storage_type: VectorStorageType::ChunkedMmap,
                index: Indexes::Hnsw(hnsw_config(ann)?),
                quantization_config: None,
                multivector_config: None,
                datatype: None,
            },
        );

        let segment_config = SegmentConfig {
            vector_data,
            sparse_vector_data: HashMap::new(),
            payload_storage_type: PayloadStorageType::Mmap,
        };

        let shard = EdgeShard::load(path, Some(segment_config))
            .map_err(|e| LgrepError::Vector(e.to_string()))?;

        let count = shard
            .count(CountRequestInternal {
                filter: None,
                exact: true,
            })
            .map_err(|e| LgrepError::Vector(e.to_string()))?;

        tracing::debug!("Opened edge shard {} with {} points", path.display(), count);

        Ok(Self {
            shard,
            dimension,
            ef_search: ann.ef_search,
            next_id: count as u64,
        })
    }
}

impl VectorIndex for EdgeIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn add(&mut self, vector: &[f32]) -> Result<u64> {
        check_dimension(self.dimension, vector)?;

        let id = self.next_id;
        let operation = CollectionUpdateOperations::PointOperation(PointOperations::UpsertPoints(
            PointInsertOperationsInternal::PointsList(vec![make_point(id, vector.to_vec())]),
        ));

        self.shard
            .update(operation)
            .map_err(|e| LgrepError::Vector(e.to_string()))?;

        self.next_id += 1;
        Ok(id)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<u64>> {
        check_dimension(self.dimension, query)?;
        if self.next_id == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let query_vec: VectorInternal = query.to_vec().into();

        let results = self
            .shard
            .query(ShardQueryRequest {
                prefetches: vec![],
                query: Some(ScoringQuery::Vector(QueryEnum::Nearest(NamedQuery {
                    query: query_vec,
                    using: Some(VECTOR_NAME.to_string()),
                }))),
                filter: None,
                score_threshold: None,
                limit: k,
                offset: 0,
                params: Some(SearchParams {
                    hnsw_ef: Some(self.ef_search),
                    ..Default::default()
                }),
                with_vector: WithVector::Bool(false),
                with_payload: WithPayloadInterface::Bool(false),
            })
            .map_err(|e| LgrepError::Vector(e.to_string()))?;

        // Results arrive best score first, which is nearest first for cosine.
        Ok(results
            .into_iter()
            .filter_map(|scored| match scored.id {
                ExtendedPointId::NumId(id) => Some(id),
                other => {
                    tracing::warn!("Ignoring non-numeric point id {:?}", other);
                    None
                }
            })
            .collect())
    }

    fn save(&mut self) -> Result<()> {
        self.shard.flush();
        Ok(())
    }

    fn size(&self) -> usize {
        self.next_id as usize
    }
}

/// HNSW parameters for the shard. Fields not named here take the engine's serde defaults.
fn hnsw_config(ann: &AnnConfig) -> Result<HnswConfig> {
    let config = serde_json::json!({
        "m": ann.m,
        "ef_construct": ann.ef_construct,
        "full_scan_threshold": FULL_SCAN_THRESHOLD_KB,
    });
    serde_json::from_value(config)
        .map_err(|e| LgrepError::Vector(format!("invalid HNSW parameters: {e}")))
}

/// Create a point struct for upserting.
fn make_point(id: u64, vector: Vec<f32>) -> PointStructPersisted {
    let mut vectors = HashMap::new();
    vectors.insert(VECTOR_NAME.to_string(), VectorInternal::from(vector));

    PointStructPersisted {
        id: ExtendedPointId::NumId(id),
        vector: VectorStructInternal::Named(vectors).into(),
        payload: None,
    }
}
