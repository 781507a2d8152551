//! Service discovery and client-side load balancing.
//!
//! A [`ServiceResolver`] maps a logical service name to its live instances; a
//! [`LoadBalancer`] picks one of them per call. The binary uses these to pick
//! a broker endpoint before connecting.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;

/// One reachable instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceInstance {
    pub host: String,
    pub port: u16,
    /// Relative share of traffic for weighted policies. Zero removes the
    /// instance from weighted selection.
    pub weight: u32,
}

impl ServiceInstance {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            host: host.into(),
            port,
            weight,
        }
    }

    /// Parses `host:port` or `host:port@weight`; weight defaults to 1.
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        let (addr, weight) = match spec.split_once('@') {
            Some((addr, w)) => (addr, w.parse().ok()?),
            None => (spec, 1),
        };
        let (host, port) = addr.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port.parse().ok()?, weight))
    }

    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("no instances registered for service {0:?}")]
    NoInstances(String),
}

/// Resolves a logical service name to its instances.
#[async_trait]
pub trait ServiceResolver: Send + Sync {
    async fn resolve(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError>;
}

/// Resolver over a fixed, configured instance table.
#[derive(Debug, Default)]
pub struct StaticResolver {
    services: HashMap<String, Vec<ServiceInstance>>,
}

impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_service(mut self, name: impl Into<String>, instances: Vec<ServiceInstance>) -> Self {
        self.services.insert(name.into(), instances);
        self
    }
}

#[async_trait]
impl ServiceResolver for StaticResolver {
    async fn resolve(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        match self.services.get(service) {
            Some(instances) if !instances.is_empty() => Ok(instances.clone()),
            _ => Err(DiscoveryError::NoInstances(service.to_string())),
        }
    }
}

/// Picks one instance out of a resolved list.
pub trait LoadBalancer: Send + Sync {
    /// Returns `None` only when no instance is eligible.
    fn select<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance>;
}

/// Uniform random choice.
#[derive(Debug, Default)]
pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn select<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..instances.len());
        instances.get(idx)
    }
}

/// Smooth weighted round-robin.
///
/// Every pick adds each instance's weight to its running score, selects the
/// highest score and subtracts the total weight from it. Over any window of
/// `sum(weights)` picks each instance is chosen exactly `weight` times, and
/// picks of a heavy instance are spread out rather than bunched.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    current: Mutex<HashMap<ServiceInstance, i64>>,
}

impl WeightedRoundRobin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn select<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        let mut current = self.current.lock();
        current.retain(|inst, _| instances.contains(inst));

        let mut total: i64 = 0;
        let mut best: Option<(&ServiceInstance, i64)> = None;
        for inst in instances.iter().filter(|i| i.weight > 0) {
            let weight = i64::from(inst.weight);
            total += weight;
            let score = current.entry(inst.clone()).or_insert(0);
            *score += weight;
            if best.map_or(true, |(_, s)| *score > s) {
                best = Some((inst, *score));
            }
        }

        let (chosen, _) = best?;
        if let Some(score) = current.get_mut(chosen) {
            *score -= total;
        }
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instances() -> Vec<ServiceInstance> {
        vec![
            ServiceInstance::new("a", 1, 5),
            ServiceInstance::new("b", 2, 1),
            ServiceInstance::new("c", 3, 1),
        ]
    }

    #[test]
    fn parse_instance_specs() {
        assert_eq!(
            ServiceInstance::parse("redis.local:6379@3"),
            Some(ServiceInstance::new("redis.local", 6379, 3))
        );
        assert_eq!(
            ServiceInstance::parse("127.0.0.1:6379"),
            Some(ServiceInstance::new("127.0.0.1", 6379, 1))
        );
        assert_eq!(ServiceInstance::parse("no-port"), None);
        assert_eq!(ServiceInstance::parse(":80"), None);
        assert_eq!(ServiceInstance::parse("h:80@x"), None);
    }

    #[tokio::test]
    async fn static_resolver_knows_only_configured_services() {
        let resolver = StaticResolver::new().with_service("broker", instances());
        assert_eq!(resolver.resolve("broker").await.unwrap().len(), 3);
        assert_eq!(
            resolver.resolve("missing").await,
            Err(DiscoveryError::NoInstances("missing".to_string()))
        );
    }

    #[test]
    fn random_balancer_picks_a_member() {
        let list = instances();
        for _ in 0..20 {
            let chosen = RandomBalancer.select(&list).unwrap();
            assert!(list.contains(chosen));
        }
        assert!(RandomBalancer.select(&[]).is_none());
    }

    #[test]
    fn smooth_wrr_matches_weights_and_interleaves() {
        let list = instances();
        let wrr = WeightedRoundRobin::new();
        let picks: Vec<&str> = (0..7)
            .map(|_| wrr.select(&list).unwrap().host.as_str())
            .collect();

        assert_eq!(picks, vec!["a", "a", "b", "a", "c", "a", "a"]);
    }

    #[test]
    fn zero_weight_instances_are_skipped() {
        let list = vec![
            ServiceInstance::new("a", 1, 0),
            ServiceInstance::new("b", 2, 2),
        ];
        let wrr = WeightedRoundRobin::new();
        for _ in 0..4 {
            assert_eq!(wrr.select(&list).unwrap().host, "b");
        }
        assert!(wrr.select(&[ServiceInstance::new("z", 1, 0)]).is_none());
    }
}
