//! Vector store door (Qdrant)
//!
//! Collection management with the appliance's fixed tuning (cosine,
//! HNSW m=16 / ef_construct=100, vectors on disk, binary quantization
//! kept in RAM), payload indices for keyword filtering, and the
//! point-level operations the writer and migration need.

use aegis_common::{Error, Result, VectorConfig};
use qdrant_client::qdrant::{
    point_id::PointIdOptions, value::Kind, BinaryQuantizationBuilder,
    Condition, CountPointsBuilder, CreateAliasBuilder, CreateCollectionBuilder,
    CreateFieldIndexCollectionBuilder, DeletePointsBuilder, Distance, FieldType, Filter,
    HnswConfigDiffBuilder, PointStruct, ScoredPoint, ScrollPointsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::info;
use uuid::Uuid;

/// Fields carrying a keyword payload index
pub const PAYLOAD_INDEX_FIELDS: &[&str] = &["space_id", "document_id", "category"];

pub struct VectorStore {
    client: Qdrant,
    config: VectorConfig,
}

impl VectorStore {
    pub fn connect(config: &VectorConfig) -> Result<Self> {
        let client = Qdrant::from_url(&config.url())
            .build()
            .map_err(|e| Error::VectorStore(format!("qdrant connect: {e}")))?;
        Ok(VectorStore {
            client,
            config: config.clone(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.config.collection
    }

    pub fn vector_size(&self) -> u64 {
        self.config.vector_size
    }

    /// Create the canonical collection (and its payload indices) if it
    /// does not exist yet.
    pub async fn ensure_collection(&self) -> Result<()> {
        let name = self.config.collection.clone();
        if !self.collection_exists(&name).await? {
            self.create_collection(&name, self.config.vector_size).await?;
        } else {
            info!("Vector collection '{}' ready", name);
        }
        Ok(())
    }

    pub async fn collection_exists(&self, name: &str) -> Result<bool> {
        self.client
            .collection_exists(name)
            .await
            .map_err(|e| Error::VectorStore(format!("collection_exists {name}: {e}")))
    }

    /// Create a collection with the appliance tuning and its payload
    /// indices.
    pub async fn create_collection(&self, name: &str, vector_size: u64) -> Result<()> {
        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(
                        VectorParamsBuilder::new(vector_size, Distance::Cosine).on_disk(true),
                    )
                    .hnsw_config(HnswConfigDiffBuilder::default().m(16).ef_construct(100))
                    .quantization_config(BinaryQuantizationBuilder::new(true)),
            )
            .await
            .map_err(|e| Error::VectorStore(format!("create collection {name}: {e}")))?;
        info!("Created vector collection: {}", name);

        for field in PAYLOAD_INDEX_FIELDS {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    name,
                    *field,
                    FieldType::Keyword,
                ))
                .await
                .map_err(|e| Error::VectorStore(format!("payload index {field}: {e}")))?;
        }
        info!("Created payload indices for collection: {}", name);
        Ok(())
    }

    pub async fn delete_collection(&self, name: &str) -> Result<()> {
        self.client
            .delete_collection(name)
            .await
            .map_err(|e| Error::VectorStore(format!("delete collection {name}: {e}")))?;
        Ok(())
    }

    /// Alias the canonical name onto a physical collection
    pub async fn create_alias(&self, alias: &str, collection: &str) -> Result<()> {
        self.client
            .create_alias(CreateAliasBuilder::new(collection, alias))
            .await
            .map_err(|e| Error::VectorStore(format!("alias {alias} -> {collection}: {e}")))?;
        Ok(())
    }

    pub async fn count(&self, name: &str) -> Result<u64> {
        let response = self
            .client
            .count(CountPointsBuilder::new(name).exact(true))
            .await
            .map_err(|e| Error::VectorStore(format!("count {name}: {e}")))?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    /// Idempotent point upsert into the canonical collection
    pub async fn upsert(&self, points: Vec<PointStruct>) -> Result<()> {
        self.upsert_into(&self.config.collection.clone(), points).await
    }

    /// Idempotent point upsert into a named collection
    pub async fn upsert_into(&self, name: &str, points: Vec<PointStruct>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        self.client
            .upsert_points(UpsertPointsBuilder::new(name, points).wait(true))
            .await
            .map_err(|e| Error::VectorStore(format!("upsert into {name}: {e}")))?;
        Ok(())
    }

    /// Delete every point belonging to a document
    pub async fn delete_document(&self, document_id: Uuid) -> Result<()> {
        let filter = Filter::must([Condition::matches(
            "document_id",
            document_id.to_string(),
        )]);
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.config.collection)
                    .points(filter)
                    .wait(true),
            )
            .await
            .map_err(|e| Error::VectorStore(format!("delete document points: {e}")))?;
        Ok(())
    }

    /// Nearest neighbours above the score threshold
    pub async fn search(
        &self,
        vector: Vec<f32>,
        limit: u64,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        let mut builder =
            SearchPointsBuilder::new(&self.config.collection, vector, limit).with_payload(true);
        if let Some(threshold) = score_threshold {
            builder = builder.score_threshold(threshold);
        }
        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| Error::VectorStore(format!("search: {e}")))?;
        Ok(response.result)
    }

    /// One representative stored vector of a document, if any
    pub async fn first_vector_of_document(&self, document_id: Uuid) -> Result<Option<Vec<f32>>> {
        let filter = Filter::must([Condition::matches(
            "document_id",
            document_id.to_string(),
        )]);
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(&self.config.collection)
                    .filter(filter)
                    .limit(1)
                    .with_vectors(true),
            )
            .await
            .map_err(|e| Error::VectorStore(format!("scroll: {e}")))?;

        Ok(response.result.into_iter().next().and_then(|point| {
            point.vectors.and_then(|v| match v.vectors_options {
                Some(qdrant_client::qdrant::vectors_output::VectorsOptions::Vector(vector)) => {
                    Some(vector.data)
                }
                _ => None,
            })
        }))
    }

    /// Build one point with the child payload
    pub fn make_point(id: Uuid, vector: Vec<f32>, payload: serde_json::Value) -> Result<PointStruct> {
        let payload = Payload::try_from(payload)
            .map_err(|e| Error::VectorStore(format!("invalid payload: {e}")))?;
        Ok(PointStruct::new(id.to_string(), vector, payload))
    }
}

/// Extract a string payload field from a scored point
pub fn payload_str<'a>(point: &'a ScoredPoint, key: &str) -> Option<&'a str> {
    match point.payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.as_str()),
        _ => None,
    }
}

/// Extract the UUID behind a point id
pub fn point_uuid(point: &ScoredPoint) -> Option<Uuid> {
    match point.id.as_ref()?.point_id_options.as_ref()? {
        PointIdOptions::Uuid(raw) => Uuid::parse_str(raw).ok(),
        PointIdOptions::Num(_) => None,
    }
}
