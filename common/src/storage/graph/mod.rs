pub mod labels;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, ConfigBuilder, Graph, Query, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    error::AppError,
    events::enrichment::{DocumentType, EnrichmentResult},
    storage::types::document::{Document, EnrichmentStatus, FallbackDocument},
    utils::config::AppConfig,
};

use self::labels::{
    CONCEPT, DIRECTORY, ENTITY, FILE, PROJECT, REL_BELONGS_TO, REL_CALLS, REL_CONTAINS,
    REL_DEFINES, REL_HAS_CONCEPT, REL_HAS_THEME, REL_IMPORTS, THEME,
};

/// Relationship an extracted entity gets from its file, discriminated on
/// the extractor's `entity_type`. Imports and calls carry their own edge
/// kinds; everything else is a definition.
pub fn entity_relationship(entity_type: &str) -> &'static str {
    match entity_type.trim().to_ascii_lowercase().as_str() {
        "import" | "imports" | "module_import" | "dependency" => REL_IMPORTS,
        "call" | "calls" | "function_call" | "method_call" => REL_CALLS,
        _ => REL_DEFINES,
    }
}

/// Producer-facing view of the graph: the skeleton upsert, the idempotency
/// check, and the scans the pending/fallback sweeper runs. `GraphClient`
/// implements it against Memgraph; tests substitute an in-memory store.
#[async_trait]
pub trait SkeletonStore: Send + Sync {
    async fn enrichment_completed(
        &self,
        project: &str,
        content_hash: &str,
    ) -> Result<bool, AppError>;

    async fn upsert_skeleton(&self, document: &Document) -> Result<(), AppError>;

    async fn pending_documents(
        &self,
        older_than: chrono::Duration,
        limit: usize,
    ) -> Result<Vec<Document>, AppError>;

    async fn fallback_documents(&self, limit: usize)
        -> Result<Vec<FallbackDocument>, AppError>;

    /// Counts a sweeper republish against the file, so the next pass can
    /// escalate from an entities-only re-enrichment to a full one.
    async fn record_fallback_sweep(
        &self,
        project: &str,
        content_hash: &str,
    ) -> Result<(), AppError>;
}

/// Bolt client for the property graph. All queries are parameterized Cypher
/// assembled from the label constants in [`labels`].
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
    batch_size: usize,
}

fn get_col<T: std::str::FromStr>(row: &Row, name: &str) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    let raw: String = row
        .get(name)
        .map_err(|e| AppError::InternalError(format!("graph row missing {name}: {e}")))?;
    raw.parse::<T>()
        .map_err(|e| AppError::InternalError(format!("graph column {name} unparsable: {e}")))
}

fn get_count(row: &Row, name: &str) -> Result<i64, AppError> {
    row.get(name)
        .map_err(|e| AppError::InternalError(format!("graph row missing {name}: {e}")))
}

impl GraphClient {
    pub async fn connect(config: &AppConfig) -> Result<Self, AppError> {
        let graph_config = ConfigBuilder::default()
            .uri(&config.memgraph_uri)
            .user(&config.memgraph_user)
            .password(&config.memgraph_password)
            .max_connections(config.graph_pool_size)
            .build()?;

        let graph = Graph::connect(graph_config).await?;

        Ok(Self {
            graph,
            batch_size: config.graph_batch_size,
        })
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        self.graph.run(query("RETURN 1")).await?;
        Ok(())
    }

    fn file_match() -> String {
        format!("MATCH (f:{FILE} {{project: $project, content_hash: $content_hash}})")
    }

    /// The minimal synchronous index: project node, directory chain, file
    /// node, and the containment topology. MERGE keeps re-ingestion free of
    /// duplicates.
    #[instrument(skip_all, fields(project = %document.project_name, path = %document.file_path))]
    pub async fn write_skeleton(&self, document: &Document) -> Result<(), AppError> {
        let mut queries: Vec<Query> = Vec::new();

        queries.push(
            query(&format!("MERGE (p:{PROJECT} {{name: $project}})"))
                .param("project", document.project_name.as_str()),
        );

        let chain = document.directory_chain();
        let mut parent: Option<&str> = None;
        for dir in &chain {
            let merge_dir = match parent {
                None => format!(
                    "MERGE (d:{DIRECTORY} {{path: $path, project: $project}}) \
                     WITH d MATCH (p:{PROJECT} {{name: $project}}) \
                     MERGE (p)-[:{REL_CONTAINS}]->(d)"
                ),
                Some(_) => format!(
                    "MERGE (d:{DIRECTORY} {{path: $path, project: $project}}) \
                     WITH d MATCH (parent:{DIRECTORY} {{path: $parent, project: $project}}) \
                     MERGE (parent)-[:{REL_CONTAINS}]->(d)"
                ),
            };
            let mut q = query(&merge_dir)
                .param("path", dir.as_str())
                .param("project", document.project_name.as_str());
            if let Some(parent_path) = parent {
                q = q.param("parent", parent_path);
            }
            queries.push(q);
            parent = Some(dir.as_str());
        }

        let file_parent = match parent {
            Some(_) => format!(
                "MATCH (parent:{DIRECTORY} {{path: $parent, project: $project}}) \
                 MATCH (f:{FILE} {{path: $path, project: $project}}) \
                 MERGE (parent)-[:{REL_CONTAINS}]->(f)"
            ),
            None => format!(
                "MATCH (parent:{PROJECT} {{name: $project}}) \
                 MATCH (f:{FILE} {{path: $path, project: $project}}) \
                 MERGE (parent)-[:{REL_CONTAINS}]->(f)"
            ),
        };

        queries.push(
            query(&format!(
                "MERGE (f:{FILE} {{path: $path, project: $project}}) \
                 SET f.document_id = $document_id, \
                     f.content_hash = $content_hash, \
                     f.document_type = $document_type, \
                     f.language = $language, \
                     f.indexed_at = $indexed_at, \
                     f.enrichment_status = $status"
            ))
            .param("path", document.file_path.as_str())
            .param("project", document.project_name.as_str())
            .param("document_id", document.document_id.to_string())
            .param("content_hash", document.content_hash.as_str())
            .param("document_type", document.document_type.to_string())
            .param(
                "language",
                document.language.clone().unwrap_or_default(),
            )
            .param("indexed_at", document.indexed_at.to_rfc3339())
            .param("status", EnrichmentStatus::Pending.to_string()),
        );

        let mut link_file = query(&file_parent)
            .param("path", document.file_path.as_str())
            .param("project", document.project_name.as_str());
        if let Some(parent_path) = parent {
            link_file = link_file.param("parent", parent_path);
        }
        queries.push(link_file);

        queries.push(
            query(&format!(
                "MATCH (f:{FILE} {{path: $path, project: $project}}) \
                 MATCH (p:{PROJECT} {{name: $project}}) \
                 MERGE (f)-[:{REL_BELONGS_TO}]->(p)"
            ))
            .param("path", document.file_path.as_str())
            .param("project", document.project_name.as_str()),
        );

        let mut txn = self.graph.start_txn().await?;
        txn.run_queries(queries).await?;
        txn.commit().await?;

        debug!(directories = chain.len(), "skeleton written");
        Ok(())
    }

    pub async fn is_enrichment_completed(
        &self,
        project: &str,
        content_hash: &str,
    ) -> Result<bool, AppError> {
        let cypher = format!(
            "{} WHERE f.enrichment_status = $status RETURN count(f) AS n",
            Self::file_match()
        );
        let mut rows = self
            .graph
            .execute(
                query(&cypher)
                    .param("project", project)
                    .param("content_hash", content_hash)
                    .param("status", EnrichmentStatus::Completed.to_string()),
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(get_count(&row, "n")? > 0),
            None => Ok(false),
        }
    }

    /// Returns the last enriched content hash recorded for the file, used to
    /// skip redundant vector writes. A file stuck on a zero-vector fallback
    /// reports no hash: its republished event must run the full stages.
    pub async fn enriched_content_hash(
        &self,
        project: &str,
        file_path: &str,
    ) -> Result<Option<String>, AppError> {
        let cypher = format!(
            "MATCH (f:{FILE} {{project: $project, path: $path}}) \
             RETURN CASE WHEN coalesce(f.vector_fallback, false) THEN '' \
                    ELSE coalesce(f.enrichment_content_hash, '') END AS hash"
        );
        let mut rows = self
            .graph
            .execute(
                query(&cypher)
                    .param("project", project)
                    .param("path", file_path),
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let hash: String = row
                    .get("hash")
                    .map_err(|e| AppError::InternalError(format!("graph row: {e}")))?;
                Ok(if hash.is_empty() { None } else { Some(hash) })
            }
            None => Ok(None),
        }
    }

    pub async fn set_enrichment_status(
        &self,
        project: &str,
        content_hash: &str,
        status: EnrichmentStatus,
    ) -> Result<(), AppError> {
        let cypher = format!("{} SET f.enrichment_status = $status", Self::file_match());
        self.graph
            .run(
                query(&cypher)
                    .param("project", project)
                    .param("content_hash", content_hash)
                    .param("status", status.to_string()),
            )
            .await?;
        Ok(())
    }

    /// Finalizes a completed enrichment on the file node. `vector_fallback`
    /// marks documents whose vector step degraded to a zero vector so the
    /// sweeper can republish them.
    pub async fn mark_enriched(
        &self,
        project: &str,
        content_hash: &str,
        vector_fallback: bool,
    ) -> Result<(), AppError> {
        let cypher = format!(
            "{} SET f.enrichment_status = $status, \
                 f.enriched_at = $enriched_at, \
                 f.enrichment_content_hash = $content_hash, \
                 f.vector_fallback = $fallback, \
                 f.fallback_sweeps = CASE WHEN $fallback \
                     THEN coalesce(f.fallback_sweeps, 0) ELSE 0 END",
            Self::file_match()
        );
        self.graph
            .run(
                query(&cypher)
                    .param("project", project)
                    .param("content_hash", content_hash)
                    .param("status", EnrichmentStatus::Completed.to_string())
                    .param("enriched_at", Utc::now().to_rfc3339())
                    .param("fallback", vector_fallback),
            )
            .await?;
        Ok(())
    }

    /// Applies an enrichment result in batched MERGE statements: file
    /// properties, concept and theme nodes with their edges, and extracted
    /// entities. Every statement is idempotent, so a retried event may
    /// safely resume partial progress.
    #[instrument(skip_all, fields(project = %document.project_name, path = %document.file_path))]
    pub async fn apply_enrichment(
        &self,
        document: &Document,
        result: &EnrichmentResult,
    ) -> Result<(), AppError> {
        let mut queries: Vec<Query> = Vec::new();

        queries.push(
            query(&format!(
                "MATCH (f:{FILE} {{path: $path, project: $project}}) \
                 SET f.quality_score = $quality, \
                     f.complexity_score = $complexity, \
                     f.onex_type = $onex_type"
            ))
            .param("path", document.file_path.as_str())
            .param("project", document.project_name.as_str())
            .param("quality", f64::from(result.quality_score))
            .param("complexity", f64::from(result.complexity_score))
            .param("onex_type", result.onex_type.clone().unwrap_or_default()),
        );

        for batch in result.concepts.chunks(self.batch_size) {
            queries.push(
                query(&format!(
                    "MATCH (f:{FILE} {{path: $path, project: $project}}) \
                     UNWIND $names AS name \
                     MERGE (c:{CONCEPT} {{name: name}}) \
                     MERGE (f)-[:{REL_HAS_CONCEPT}]->(c)"
                ))
                .param("path", document.file_path.as_str())
                .param("project", document.project_name.as_str())
                .param("names", batch.to_vec()),
            );
        }

        for batch in result.themes.chunks(self.batch_size) {
            queries.push(
                query(&format!(
                    "MATCH (f:{FILE} {{path: $path, project: $project}}) \
                     UNWIND $names AS name \
                     MERGE (t:{THEME} {{name: name}}) \
                     MERGE (f)-[:{REL_HAS_THEME}]->(t)"
                ))
                .param("path", document.file_path.as_str())
                .param("project", document.project_name.as_str())
                .param("names", batch.to_vec()),
            );
        }

        // The extractor's entity_type decides the edge: imports and calls
        // get their own relationship kinds, the rest are definitions.
        let mut by_relationship: BTreeMap<&'static str, Vec<&crate::events::enrichment::ExtractedEntity>> =
            BTreeMap::new();
        for entity in &result.entities {
            by_relationship
                .entry(entity_relationship(&entity.entity_type))
                .or_default()
                .push(entity);
        }

        for (relationship, entities) in &by_relationship {
            for batch in entities.chunks(self.batch_size) {
                let ids: Vec<String> = batch.iter().map(|e| e.id.clone()).collect();
                let names: Vec<String> = batch.iter().map(|e| e.name.clone()).collect();
                let kinds: Vec<String> = batch.iter().map(|e| e.entity_type.clone()).collect();
                queries.push(
                    query(&format!(
                        "MATCH (f:{FILE} {{path: $path, project: $project}}) \
                         UNWIND range(0, size($ids) - 1) AS i \
                         MERGE (e:{ENTITY} {{id: $ids[i]}}) \
                         SET e.name = $names[i], e.entity_type = $kinds[i] \
                         MERGE (f)-[:{relationship}]->(e)"
                    ))
                    .param("path", document.file_path.as_str())
                    .param("project", document.project_name.as_str())
                    .param("ids", ids)
                    .param("names", names)
                    .param("kinds", kinds),
                );
            }
        }

        let statements = queries.len();
        let mut txn = self.graph.start_txn().await?;
        txn.run_queries(queries).await?;
        txn.commit().await?;

        debug!(
            statements,
            concepts = result.concepts.len(),
            themes = result.themes.len(),
            entities = result.entities.len(),
            "enrichment applied to graph"
        );
        Ok(())
    }

    async fn collect_documents(&self, cypher: &str, q: Query) -> Result<Vec<Document>, AppError> {
        let mut rows = self.graph.execute(q).await?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next().await? {
            let document_id: Uuid = get_col(&row, "document_id")?;
            let indexed_at: DateTime<Utc> = get_col::<DateTime<Utc>>(&row, "indexed_at")?;
            let document_type: String = row
                .get("document_type")
                .map_err(|e| AppError::InternalError(format!("graph row: {e}")))?;
            let language: String = row
                .get("language")
                .map_err(|e| AppError::InternalError(format!("graph row: {e}")))?;
            let mut document = Document::new(
                document_id,
                row.get::<String>("project")
                    .map_err(|e| AppError::InternalError(format!("graph row: {e}")))?,
                row.get::<String>("content_hash")
                    .map_err(|e| AppError::InternalError(format!("graph row: {e}")))?,
                row.get::<String>("path")
                    .map_err(|e| AppError::InternalError(format!("graph row: {e}")))?,
                DocumentType::parse_lenient(&document_type),
                (!language.is_empty()).then_some(language),
            );
            document.indexed_at = indexed_at;
            documents.push(document);
        }
        debug!(query = cypher, count = documents.len(), "documents scanned");
        Ok(documents)
    }

    /// Files still `pending` after the given age: their enrichment event was
    /// lost or never acknowledged, so the sweeper re-emits them.
    pub async fn scan_pending(
        &self,
        older_than: chrono::Duration,
        limit: usize,
    ) -> Result<Vec<Document>, AppError> {
        let cutoff = (Utc::now() - older_than).to_rfc3339();
        let cypher = format!(
            "MATCH (f:{FILE}) \
             WHERE f.enrichment_status = $status AND f.indexed_at < $cutoff \
             RETURN f.document_id AS document_id, f.project AS project, \
                    f.content_hash AS content_hash, f.path AS path, \
                    f.document_type AS document_type, \
                    coalesce(f.language, '') AS language, \
                    f.indexed_at AS indexed_at \
             ORDER BY f.indexed_at ASC LIMIT $limit"
        );
        let q = query(&cypher)
            .param("status", EnrichmentStatus::Pending.to_string())
            .param("cutoff", cutoff)
            .param("limit", limit as i64);
        self.collect_documents(&cypher, q).await
    }

    /// Completed files whose vector step fell back to a zero vector, with
    /// the number of sweeper republishes already recorded for each.
    pub async fn scan_fallbacks(&self, limit: usize) -> Result<Vec<FallbackDocument>, AppError> {
        let cypher = format!(
            "MATCH (f:{FILE}) \
             WHERE f.vector_fallback = true AND f.enrichment_status = $status \
             RETURN f.document_id AS document_id, f.project AS project, \
                    f.content_hash AS content_hash, f.path AS path, \
                    f.document_type AS document_type, \
                    coalesce(f.language, '') AS language, \
                    f.indexed_at AS indexed_at, \
                    coalesce(f.fallback_sweeps, 0) AS fallback_sweeps \
             LIMIT $limit"
        );
        let q = query(&cypher)
            .param("status", EnrichmentStatus::Completed.to_string())
            .param("limit", limit as i64);

        let mut rows = self.graph.execute(q).await?;
        let mut fallbacks = Vec::new();
        while let Some(row) = rows.next().await? {
            let document_id: Uuid = get_col(&row, "document_id")?;
            let indexed_at: DateTime<Utc> = get_col::<DateTime<Utc>>(&row, "indexed_at")?;
            let document_type: String = row
                .get("document_type")
                .map_err(|e| AppError::InternalError(format!("graph row: {e}")))?;
            let language: String = row
                .get("language")
                .map_err(|e| AppError::InternalError(format!("graph row: {e}")))?;
            let mut document = Document::new(
                document_id,
                row.get::<String>("project")
                    .map_err(|e| AppError::InternalError(format!("graph row: {e}")))?,
                row.get::<String>("content_hash")
                    .map_err(|e| AppError::InternalError(format!("graph row: {e}")))?,
                row.get::<String>("path")
                    .map_err(|e| AppError::InternalError(format!("graph row: {e}")))?,
                DocumentType::parse_lenient(&document_type),
                (!language.is_empty()).then_some(language),
            );
            document.indexed_at = indexed_at;
            fallbacks.push(FallbackDocument {
                document,
                reprocess_attempts: get_count(&row, "fallback_sweeps")?,
            });
        }
        Ok(fallbacks)
    }

    /// Increments the file's fallback sweep counter after a republish.
    pub async fn bump_fallback_sweeps(
        &self,
        project: &str,
        content_hash: &str,
    ) -> Result<(), AppError> {
        let cypher = format!(
            "{} SET f.fallback_sweeps = coalesce(f.fallback_sweeps, 0) + 1",
            Self::file_match()
        );
        self.graph
            .run(
                query(&cypher)
                    .param("project", project)
                    .param("content_hash", content_hash),
            )
            .await?;
        Ok(())
    }

    async fn single_count(&self, cypher: &str) -> Result<i64, AppError> {
        let mut rows = self.graph.execute(query(cypher)).await?;
        match rows.next().await? {
            Some(row) => get_count(&row, "n"),
            None => Ok(0),
        }
    }

    pub async fn file_count(&self) -> Result<i64, AppError> {
        self.single_count(&format!("MATCH (f:{FILE}) RETURN count(f) AS n"))
            .await
    }

    pub async fn relationship_count(&self) -> Result<i64, AppError> {
        self.single_count("MATCH ()-[r]->() RETURN count(r) AS n")
            .await
    }

    /// Files reachable from a project root through containment. The health
    /// validator compares this against the total file count.
    pub async fn reachable_file_count(&self) -> Result<i64, AppError> {
        self.single_count(&format!(
            "MATCH (p:{PROJECT})-[:{REL_CONTAINS}*]->(f:{FILE}) \
             RETURN count(DISTINCT f) AS n"
        ))
        .await
    }

    pub async fn orphan_files(&self, limit: usize) -> Result<Vec<(String, String)>, AppError> {
        let cypher = format!(
            "MATCH (f:{FILE}) \
             WHERE NOT (:{PROJECT})-[:{REL_CONTAINS}*]->(f) \
             RETURN f.path AS path, f.project AS project LIMIT $limit"
        );
        let mut rows = self
            .graph
            .execute(query(&cypher).param("limit", limit as i64))
            .await?;
        let mut orphans = Vec::new();
        while let Some(row) = rows.next().await? {
            let path: String = row
                .get("path")
                .map_err(|e| AppError::InternalError(format!("graph row: {e}")))?;
            let project: String = row
                .get("project")
                .map_err(|e| AppError::InternalError(format!("graph row: {e}")))?;
            orphans.push((project, path));
        }
        Ok(orphans)
    }

    pub async fn relationship_type_counts(&self) -> Result<BTreeMap<String, i64>, AppError> {
        let mut rows = self
            .graph
            .execute(query(
                "MATCH ()-[r]->() RETURN type(r) AS kind, count(r) AS n",
            ))
            .await?;
        let mut counts = BTreeMap::new();
        while let Some(row) = rows.next().await? {
            let kind: String = row
                .get("kind")
                .map_err(|e| AppError::InternalError(format!("graph row: {e}")))?;
            counts.insert(kind, get_count(&row, "n")?);
        }
        Ok(counts)
    }

    /// Completed documents, for the data-integrity validator's vector
    /// coverage sample.
    pub async fn scan_completed(&self, limit: usize) -> Result<Vec<Document>, AppError> {
        let cypher = format!(
            "MATCH (f:{FILE}) \
             WHERE f.enrichment_status = $status \
             RETURN f.document_id AS document_id, f.project AS project, \
                    f.content_hash AS content_hash, f.path AS path, \
                    f.document_type AS document_type, \
                    coalesce(f.language, '') AS language, \
                    f.indexed_at AS indexed_at \
             LIMIT $limit"
        );
        let q = query(&cypher)
            .param("status", EnrichmentStatus::Completed.to_string())
            .param("limit", limit as i64);
        self.collect_documents(&cypher, q).await
    }
}

#[async_trait]
impl SkeletonStore for GraphClient {
    async fn enrichment_completed(
        &self,
        project: &str,
        content_hash: &str,
    ) -> Result<bool, AppError> {
        self.is_enrichment_completed(project, content_hash).await
    }

    async fn upsert_skeleton(&self, document: &Document) -> Result<(), AppError> {
        self.write_skeleton(document).await
    }

    async fn pending_documents(
        &self,
        older_than: chrono::Duration,
        limit: usize,
    ) -> Result<Vec<Document>, AppError> {
        self.scan_pending(older_than, limit).await
    }

    async fn fallback_documents(
        &self,
        limit: usize,
    ) -> Result<Vec<FallbackDocument>, AppError> {
        self.scan_fallbacks(limit).await
    }

    async fn record_fallback_sweep(
        &self,
        project: &str,
        content_hash: &str,
    ) -> Result<(), AppError> {
        self.bump_fallback_sweeps(project, content_hash).await
    }
}
