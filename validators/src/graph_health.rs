use common::{
    error::AppError,
    storage::graph::{labels::EXPECTED_RELATIONSHIPS, GraphClient},
};
use serde::Serialize;
use tracing::info;

use crate::report::Verdict;

const MIN_DENSITY: f64 = 0.5;
const MIN_COVERAGE: f64 = 0.95;
const MAX_ORPHANS: usize = 10;

#[derive(Debug, Serialize)]
pub struct GraphHealthReport {
    pub files: i64,
    pub relationships: i64,
    pub relationship_density: f64,
    pub tree_coverage: f64,
    pub orphan_count: usize,
    pub orphans: Vec<OrphanedFile>,
    pub missing_relationship_types: Vec<String>,
    pub verdict: Verdict,
}

#[derive(Debug, Serialize)]
pub struct OrphanedFile {
    pub project: String,
    pub path: String,
}

/// Severity from the four checked properties. Any orphan or a coverage gap
/// is at least a warning; breaching the invariant bounds is critical.
pub fn verdict_for(
    files: i64,
    density: f64,
    coverage: f64,
    orphan_count: usize,
    missing_types: usize,
) -> Verdict {
    if files == 0 {
        return Verdict::Warn;
    }
    if coverage < MIN_COVERAGE || orphan_count > MAX_ORPHANS {
        return Verdict::Critical;
    }
    if density < MIN_DENSITY || orphan_count > 0 || missing_types > 0 {
        return Verdict::Warn;
    }
    Verdict::Healthy
}

pub async fn run(
    graph: &GraphClient,
    list_orphans: usize,
) -> Result<GraphHealthReport, AppError> {
    let files = graph.file_count().await?;
    let relationships = graph.relationship_count().await?;
    let reachable = graph.reachable_file_count().await?;
    let orphans = graph.orphan_files(list_orphans.max(MAX_ORPHANS + 1)).await?;
    let type_counts = graph.relationship_type_counts().await?;

    let density = if files > 0 {
        relationships as f64 / files as f64
    } else {
        0.0
    };
    let coverage = if files > 0 {
        reachable as f64 / files as f64
    } else {
        0.0
    };
    let missing: Vec<String> = EXPECTED_RELATIONSHIPS
        .iter()
        .filter(|rel| !type_counts.contains_key(**rel))
        .map(|rel| (*rel).to_string())
        .collect();

    let verdict = verdict_for(files, density, coverage, orphans.len(), missing.len());
    info!(
        files,
        relationships,
        density,
        coverage,
        orphans = orphans.len(),
        ?verdict,
        "graph health check finished"
    );

    Ok(GraphHealthReport {
        files,
        relationships,
        relationship_density: density,
        tree_coverage: coverage,
        orphan_count: orphans.len(),
        orphans: orphans
            .into_iter()
            .take(list_orphans)
            .map(|(project, path)| OrphanedFile { project, path })
            .collect(),
        missing_relationship_types: missing,
        verdict,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pristine_graph_is_healthy() {
        assert_eq!(verdict_for(100, 2.5, 1.0, 0, 0), Verdict::Healthy);
    }

    #[test]
    fn single_orphan_breaks_coverage_to_critical() {
        // One orphan out of ten files: coverage 0.9 breaches the bound.
        assert_eq!(verdict_for(10, 2.0, 0.9, 1, 0), Verdict::Critical);
    }

    #[test]
    fn orphan_within_coverage_bound_warns() {
        // One orphan out of a thousand files keeps coverage above 95%.
        assert_eq!(verdict_for(1000, 2.0, 0.999, 1, 0), Verdict::Warn);
    }

    #[test]
    fn orphans_over_limit_are_critical() {
        assert_eq!(verdict_for(1000, 2.0, 0.99, 11, 0), Verdict::Critical);
    }

    #[test]
    fn sparse_relationships_warn() {
        assert_eq!(verdict_for(100, 0.4, 1.0, 0, 0), Verdict::Warn);
    }

    #[test]
    fn missing_relationship_types_warn() {
        assert_eq!(verdict_for(100, 2.0, 1.0, 0, 2), Verdict::Warn);
    }

    #[test]
    fn empty_graph_warns() {
        assert_eq!(verdict_for(0, 0.0, 0.0, 0, 4), Verdict::Warn);
    }
}
