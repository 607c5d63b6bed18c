//! Load balancers choose one provider per attempt

use crate::message::Request;
use luix_registry::{Strategies, Url};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks a provider uniformly at random
pub const RANDOM: &str = "random";

/// Cycles through providers in order
pub const ROUND_ROBIN: &str = "roundRobin";

/// Selects a provider for a request
pub trait LoadBalancer: Send + Sync {
    /// Strategy name
    fn name(&self) -> &'static str;

    /// Choose among `providers`, `None` when the list is empty
    fn select(&self, providers: &[Url], request: &Request) -> Option<Url>;
}

/// Uniform random choice
#[derive(Debug, Default)]
pub struct RandomLoadBalancer;

impl LoadBalancer for RandomLoadBalancer {
    fn name(&self) -> &'static str {
        RANDOM
    }

    fn select(&self, providers: &[Url], _request: &Request) -> Option<Url> {
        if providers.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..providers.len());
        providers.get(index).cloned()
    }
}

/// Round robin over the current list
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    next: AtomicUsize,
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn name(&self) -> &'static str {
        ROUND_ROBIN
    }

    fn select(&self, providers: &[Url], _request: &Request) -> Option<Url> {
        if providers.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % providers.len();
        providers.get(index).cloned()
    }
}

/// Built-in load balancers
pub fn load_balancers() -> Strategies<Arc<dyn LoadBalancer>> {
    Strategies::new("load balancer")
        .with(RANDOM, || Arc::new(RandomLoadBalancer) as Arc<dyn LoadBalancer>)
        .with(ROUND_ROBIN, || {
            Arc::new(RoundRobinLoadBalancer::default()) as Arc<dyn LoadBalancer>
        })
}
