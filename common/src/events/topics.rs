use std::time::Duration;

/// Domain segment used in every topic name.
pub const TOPIC_DOMAIN: &str = "archon-intelligence";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    Delete,
    Compact,
}

impl CleanupPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Compact => "compact",
        }
    }
}

/// Desired broker-side configuration for one topic. The consumer does not
/// create topics; operators apply these specs, and the pipeline monitor
/// reads them when sampling lag.
#[derive(Debug, Clone)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication: i32,
    pub retention: Duration,
    pub cleanup: CleanupPolicy,
    pub compression: &'static str,
}

/// Topic names follow `<env>.<domain>.<action>.<version>`.
pub fn topic_name(env: &str, action: &str, version: u16) -> String {
    format!("{env}.{TOPIC_DOMAIN}.{action}.v{version}")
}

fn replication_for(env: &str) -> i32 {
    if env == "prod" {
        3
    } else {
        1
    }
}

impl TopicSpec {
    /// Enrichment request topic: partitioned for the consumer fleet, keyed
    /// by document id, week-long retention.
    pub fn enrichment(env: &str) -> Self {
        Self {
            name: topic_name(env, "enrich-document", 1),
            partitions: 4,
            replication: replication_for(env),
            retention: Duration::from_secs(7 * 24 * 3600),
            cleanup: CleanupPolicy::Delete,
            compression: "snappy",
        }
    }

    /// DLQ: single partition, compacted on document id so only the latest
    /// failure per document survives.
    pub fn dlq(env: &str) -> Self {
        Self {
            name: topic_name(env, "enrich-document-dlq", 1),
            partitions: 1,
            replication: replication_for(env),
            retention: Duration::from_secs(30 * 24 * 3600),
            cleanup: CleanupPolicy::Compact,
            compression: "gzip",
        }
    }

    pub fn completed(env: &str) -> Self {
        Self {
            name: topic_name(env, "enrichment-completed", 1),
            partitions: 4,
            replication: replication_for(env),
            retention: Duration::from_secs(6 * 3600),
            cleanup: CleanupPolicy::Delete,
            compression: "snappy",
        }
    }

    pub fn progress(env: &str) -> Self {
        Self {
            name: topic_name(env, "enrichment-progress", 1),
            partitions: 4,
            replication: replication_for(env),
            retention: Duration::from_secs(3600),
            cleanup: CleanupPolicy::Delete,
            compression: "snappy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_follow_convention() {
        assert_eq!(
            topic_name("dev", "enrich-document", 1),
            "dev.archon-intelligence.enrich-document.v1"
        );
        assert_eq!(
            TopicSpec::dlq("prod").name,
            "prod.archon-intelligence.enrich-document-dlq.v1"
        );
    }

    #[test]
    fn replication_depends_on_environment() {
        assert_eq!(TopicSpec::enrichment("prod").replication, 3);
        assert_eq!(TopicSpec::enrichment("dev").replication, 1);
    }

    #[test]
    fn dlq_is_compacted_single_partition() {
        let spec = TopicSpec::dlq("dev");
        assert_eq!(spec.partitions, 1);
        assert_eq!(spec.cleanup, CleanupPolicy::Compact);
        assert_eq!(spec.retention, Duration::from_secs(30 * 24 * 3600));
    }
}
