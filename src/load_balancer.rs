//! Load balancer
//!
//! Side-effect-free selection of one instance among a service's instances.
//! Only healthy instances are ever candidates. The caller supplies the RNG so
//! selection stays deterministic under a seeded generator.

use crate::registry::{LoadBalancingStrategy, ServiceInstance};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no healthy instance available")]
    NoHealthyInstance,
}

// An instance paired with the connection count read at selection time
type Candidate<'a> = (&'a Arc<ServiceInstance>, i64);

pub struct LoadBalancer;

impl LoadBalancer {
    pub fn select<'a, R: Rng + ?Sized>(
        instances: &'a [Arc<ServiceInstance>],
        strategy: LoadBalancingStrategy,
        rng: &mut R,
    ) -> Result<&'a Arc<ServiceInstance>, SelectionError> {
        let healthy: Vec<Candidate<'a>> = instances
            .iter()
            .filter(|instance| instance.is_healthy())
            .map(|instance| (instance, instance.active_connections()))
            .collect();

        match healthy.len() {
            0 => Err(SelectionError::NoHealthyInstance),
            1 => Ok(healthy[0].0),
            _ => Ok(match strategy {
                LoadBalancingStrategy::RoundRobinLeastBusy => {
                    Self::select_round_robin_least_busy(&healthy, rng)
                }
                LoadBalancingStrategy::LeastConnections => Self::select_least_connections(&healthy),
                LoadBalancingStrategy::Random => Self::select_random(&healthy, rng),
                LoadBalancingStrategy::WeightedRandom => Self::select_weighted_random(&healthy, rng),
            }),
        }
    }

    // Not a rotating cursor: favors the least loaded instances and breaks ties
    // randomly, so no iteration state is shared between calls.
    fn select_round_robin_least_busy<'a, R: Rng + ?Sized>(
        candidates: &[Candidate<'a>],
        rng: &mut R,
    ) -> &'a Arc<ServiceInstance> {
        let min_connections = candidates.iter().map(|(_, c)| *c).min().unwrap_or(0);
        let least_busy: Vec<&Candidate<'a>> = candidates
            .iter()
            .filter(|(_, c)| *c == min_connections)
            .collect();

        least_busy
            .choose(rng)
            .map(|(instance, _)| *instance)
            .unwrap_or(candidates[0].0)
    }

    // First instance wins on ties
    fn select_least_connections<'a>(candidates: &[Candidate<'a>]) -> &'a Arc<ServiceInstance> {
        let mut selected = candidates[0];
        for candidate in &candidates[1..] {
            if candidate.1 < selected.1 {
                selected = *candidate;
            }
        }
        selected.0
    }

    fn select_random<'a, R: Rng + ?Sized>(
        candidates: &[Candidate<'a>],
        rng: &mut R,
    ) -> &'a Arc<ServiceInstance> {
        candidates[rng.gen_range(0..candidates.len())].0
    }

    fn select_weighted_random<'a, R: Rng + ?Sized>(
        candidates: &[Candidate<'a>],
        rng: &mut R,
    ) -> &'a Arc<ServiceInstance> {
        let total_weight: u64 = candidates.iter().map(|(i, _)| u64::from(i.weight)).sum();
        if total_weight == 0 {
            return Self::select_random(candidates, rng);
        }

        let draw = rng.gen_range(0..total_weight);
        let mut cumulative = 0u64;
        for &(instance, _) in candidates {
            cumulative += u64::from(instance.weight);
            if cumulative > draw {
                return instance;
            }
        }

        // Unreachable while draw < total_weight
        candidates[candidates.len() - 1].0
    }
}
