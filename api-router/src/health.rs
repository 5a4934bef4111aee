use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

/// Aggregate service health: `degraded` when only non-critical dependencies
/// are down, `unhealthy` when Kafka or a storage sink is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthLevel,
    pub dependencies: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct DependencyStatus {
    pub name: &'static str,
    pub critical: bool,
    pub healthy: bool,
    pub detail: String,
}

/// Dependency probing seam; the binary wires the real clients in, tests use
/// a stub.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn probe(&self) -> Vec<DependencyStatus>;
}

pub fn summarize(statuses: Vec<DependencyStatus>) -> HealthReport {
    let mut dependencies = BTreeMap::new();
    let mut critical_down = false;
    let mut any_down = false;

    for status in statuses {
        if !status.healthy {
            any_down = true;
            critical_down |= status.critical;
        }
        let detail = if status.healthy {
            "ok".to_string()
        } else {
            format!("fail: {}", status.detail)
        };
        dependencies.insert(status.name.to_string(), detail);
    }

    let status = if critical_down {
        HealthLevel::Unhealthy
    } else if any_down {
        HealthLevel::Degraded
    } else {
        HealthLevel::Healthy
    };

    HealthReport {
        status,
        dependencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(name: &'static str, critical: bool, healthy: bool) -> DependencyStatus {
        DependencyStatus {
            name,
            critical,
            healthy,
            detail: if healthy { String::new() } else { "down".into() },
        }
    }

    #[test]
    fn all_up_is_healthy() {
        let report = summarize(vec![
            status("kafka", true, true),
            status("graph", true, true),
            status("cache", false, true),
        ]);
        assert_eq!(report.status, HealthLevel::Healthy);
        assert_eq!(report.dependencies.get("kafka").map(String::as_str), Some("ok"));
    }

    #[test]
    fn non_critical_down_degrades() {
        let report = summarize(vec![
            status("kafka", true, true),
            status("cache", false, false),
        ]);
        assert_eq!(report.status, HealthLevel::Degraded);
        assert!(report
            .dependencies
            .get("cache")
            .is_some_and(|d| d.starts_with("fail")));
    }

    #[test]
    fn critical_down_is_unhealthy() {
        let report = summarize(vec![
            status("kafka", true, false),
            status("cache", false, true),
        ]);
        assert_eq!(report.status, HealthLevel::Unhealthy);
    }
}
