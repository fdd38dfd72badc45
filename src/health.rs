//! Health checking for Servio components.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Service is healthy.
    Healthy,
    /// Service is degraded but operational.
    Degraded,
    /// Service is unhealthy.
    Unhealthy,
}

impl HealthStatus {
    /// Convert to HTTP status code.
    pub fn to_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded => 200, // Still operational
            HealthStatus::Unhealthy => 503,
        }
    }

    /// Combine two statuses (worst wins).
    pub fn combine(&self, other: &HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Individual component health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name.
    pub name: String,
    /// Health status.
    pub status: HealthStatus,
    /// Optional message.
    pub message: Option<String>,
}

impl ComponentHealth {
    /// Creates a component health result.
    pub fn new(name: &str, status: HealthStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: None,
        }
    }

    /// Attaches a message.
    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }
}

/// A component that can report its health.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Run the probe.
    async fn check(&self) -> ComponentHealth;
}

/// Runs registered probes and combines their results.
#[derive(Default)]
pub struct HealthChecker {
    probes: Vec<Box<dyn HealthProbe>>,
}

impl HealthChecker {
    /// Creates an empty checker.
    pub fn new() -> Self {
        Self { probes: Vec::new() }
    }

    /// Registers a probe.
    pub fn register(&mut self, probe: Box<dyn HealthProbe>) {
        self.probes.push(probe);
    }

    /// Runs every probe; the combined status is the worst individual one.
    pub async fn check_all(&self) -> (HealthStatus, Vec<ComponentHealth>) {
        let mut components = Vec::with_capacity(self.probes.len());
        let mut status = HealthStatus::Healthy;

        for probe in &self.probes {
            let health = probe.check().await;
            status = status.combine(&health.status);
            components.push(health);
        }

        (status, components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(HealthStatus);

    #[async_trait]
    impl HealthProbe for FixedProbe {
        async fn check(&self) -> ComponentHealth {
            ComponentHealth::new("fixed", self.0)
        }
    }

    #[test]
    fn test_status_combine() {
        assert_eq!(
            HealthStatus::Healthy.combine(&HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.combine(&HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthStatus::Healthy.combine(&HealthStatus::Healthy),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(HealthStatus::Healthy.to_status_code(), 200);
        assert_eq!(HealthStatus::Degraded.to_status_code(), 200);
        assert_eq!(HealthStatus::Unhealthy.to_status_code(), 503);
    }

    #[tokio::test]
    async fn test_checker_combines_worst() {
        let mut checker = HealthChecker::new();
        checker.register(Box::new(FixedProbe(HealthStatus::Healthy)));
        checker.register(Box::new(FixedProbe(HealthStatus::Degraded)));

        let (status, components) = checker.check_all().await;
        assert_eq!(status, HealthStatus::Degraded);
        assert_eq!(components.len(), 2);
    }
}
