//! Scheduler strategies (spec.md §4.3): pluggable placement ranking over the
//! set of label-eligible pools for a job. Selected by name from
//! `hodei_config::system::SchedulerConfig`, mirroring the teacher's
//! registry-by-kind pattern for step executors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use chrono::Utc;
use hodei_config::system::LeastLoadedWeights;
use hodei_core::pool::ResourcePool;

/// Ranks label-eligible pools for one job and picks a placement. Ties are
/// always broken by lexical pool name so placement is deterministic given
/// the same inputs (spec.md P3).
pub trait SchedulingStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn select(&self, candidates: &[ResourcePool]) -> Option<ResourcePool>;
}

fn break_ties_by_name(mut ranked: Vec<(f64, ResourcePool)>) -> Option<ResourcePool> {
    if ranked.is_empty() {
        return None;
    }
    ranked.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.name.cmp(&b.1.name))
    });
    Some(ranked.remove(0).1)
}

/// Cycles through eligible pools in lexical order, one per tick, regardless
/// of load. Simplest strategy; useful when pools are homogeneous.
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn select(&self, candidates: &[ResourcePool]) -> Option<ResourcePool> {
        if candidates.is_empty() {
            return None;
        }
        let mut ordered: Vec<&ResourcePool> = candidates.iter().collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name));
        let idx = self.cursor.fetch_add(1, AtomicOrdering::Relaxed) % ordered.len();
        Some(ordered[idx].clone())
    }
}

/// Ranks by a weighted blend of cpu%, mem%, and active-worker ratio; lowest
/// composite score wins. Stale utilization samples are treated as fully
/// loaded (worst score) per spec.md §4.3 edge cases.
pub struct LeastLoaded {
    weights: LeastLoadedWeights,
    utilization_max_age: Duration,
}

impl LeastLoaded {
    pub fn new(weights: LeastLoadedWeights, utilization_max_age: Duration) -> Self {
        Self { weights, utilization_max_age }
    }

    fn score(&self, pool: &ResourcePool) -> f64 {
        match &pool.utilization {
            None => f64::INFINITY,
            Some(u) if u.is_stale(Utc::now(), self.utilization_max_age) => f64::INFINITY,
            Some(u) => {
                let active_ratio = if pool.max_workers == 0 {
                    1.0
                } else {
                    u.active_workers as f64 / pool.max_workers as f64
                };
                self.weights.cpu * (u.cpu_pct / 100.0)
                    + self.weights.mem * (u.mem_pct / 100.0)
                    + self.weights.active_ratio * active_ratio
            }
        }
    }
}

impl SchedulingStrategy for LeastLoaded {
    fn name(&self) -> &'static str {
        "least-loaded"
    }

    fn select(&self, candidates: &[ResourcePool]) -> Option<ResourcePool> {
        let ranked = candidates
            .iter()
            .map(|p| (self.score(p), p.clone()))
            .collect();
        break_ties_by_name(ranked)
    }
}

/// Picks the pool with the fewest free slots that can still take the job --
/// i.e. the tightest fit -- to pack load onto fewer pools and let idle pools
/// scale down. Pools with zero free capacity are excluded from candidates by
/// the caller before `select` runs.
pub struct GreedyBestFit;

impl SchedulingStrategy for GreedyBestFit {
    fn name(&self) -> &'static str {
        "greedy-best-fit"
    }

    fn select(&self, candidates: &[ResourcePool]) -> Option<ResourcePool> {
        let ranked = candidates
            .iter()
            .map(|p| {
                let active = p.utilization.as_ref().map(|u| u.active_workers).unwrap_or(0);
                let free = p.max_workers.saturating_sub(active);
                (free as f64, p.clone())
            })
            .collect();
        break_ties_by_name(ranked)
    }
}

/// Identical ranking to greedy-best-fit but named separately per spec.md's
/// distinct placement-algorithm taxonomy: here the "bin" is the pool and the
/// "item" the job, packing jobs into the fewest active pools rather than
/// spreading them, which for a single-job-at-a-time placement decision
/// reduces to the same tightest-remaining-capacity ordering.
pub struct BinPacking;

impl SchedulingStrategy for BinPacking {
    fn name(&self) -> &'static str {
        "bin-packing"
    }

    fn select(&self, candidates: &[ResourcePool]) -> Option<ResourcePool> {
        GreedyBestFit.select(candidates)
    }
}

/// Looks strategies up by the name configured in `SystemConfig`.
pub fn build_registry(weights: LeastLoadedWeights, utilization_max_age: Duration) -> HashMap<&'static str, Box<dyn SchedulingStrategy>> {
    let mut registry: HashMap<&'static str, Box<dyn SchedulingStrategy>> = HashMap::new();
    registry.insert("round-robin", Box::new(RoundRobin::new()));
    registry.insert("least-loaded", Box::new(LeastLoaded::new(weights, utilization_max_age)));
    registry.insert("greedy-best-fit", Box::new(GreedyBestFit));
    registry.insert("bin-packing", Box::new(BinPacking));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodei_core::pool::PoolUtilization;
    use chrono::Utc;

    fn pool_with(name: &str, active: u32, max: u32, cpu_pct: f64) -> ResourcePool {
        let mut p = ResourcePool::new(name, "docker", max);
        p.utilization = Some(PoolUtilization {
            cpu_pct,
            mem_pct: cpu_pct,
            active_workers: active,
            queued_for_pool: 0,
            sampled_at: Utc::now(),
        });
        p
    }

    fn default_least_loaded() -> LeastLoaded {
        LeastLoaded::new(LeastLoadedWeights::default(), Duration::from_secs(15))
    }

    #[test]
    fn least_loaded_prefers_lower_composite_score() {
        let strategy = default_least_loaded();
        let low = pool_with("a", 1, 10, 10.0);
        let high = pool_with("b", 9, 10, 90.0);
        let chosen = strategy.select(&[high, low.clone()]).unwrap();
        assert_eq!(chosen.name, "a");
    }

    #[test]
    fn least_loaded_breaks_ties_lexically() {
        let strategy = default_least_loaded();
        let a = pool_with("alpha", 0, 10, 0.0);
        let b = pool_with("beta", 0, 10, 0.0);
        let chosen = strategy.select(&[b, a]).unwrap();
        assert_eq!(chosen.name, "alpha");
    }

    #[test]
    fn least_loaded_deprioritizes_missing_utilization() {
        let strategy = default_least_loaded();
        let unsampled = ResourcePool::new("unsampled", "docker", 10);
        let loaded = pool_with("loaded", 9, 10, 90.0);
        let chosen = strategy.select(&[unsampled, loaded]).unwrap();
        assert_eq!(chosen.name, "loaded");
    }

    #[test]
    fn least_loaded_deprioritizes_stale_utilization() {
        let strategy = default_least_loaded();
        let mut stale = pool_with("stale", 0, 10, 0.0);
        stale.utilization.as_mut().unwrap().sampled_at = Utc::now() - chrono::Duration::seconds(60);
        let loaded = pool_with("loaded", 9, 10, 90.0);
        let chosen = strategy.select(&[stale, loaded]).unwrap();
        assert_eq!(chosen.name, "loaded");
    }

    #[test]
    fn round_robin_cycles_lexically() {
        let strategy = RoundRobin::new();
        let a = ResourcePool::new("a", "docker", 1);
        let b = ResourcePool::new("b", "docker", 1);
        let candidates = vec![a, b];
        let first = strategy.select(&candidates).unwrap();
        let second = strategy.select(&candidates).unwrap();
        assert_eq!(first.name, "a");
        assert_eq!(second.name, "b");
    }

    #[test]
    fn greedy_best_fit_prefers_tightest_remaining_capacity() {
        let strategy = GreedyBestFit;
        let loose = pool_with("loose", 1, 10, 10.0);
        let tight = pool_with("tight", 9, 10, 10.0);
        let chosen = strategy.select(&[loose, tight]).unwrap();
        assert_eq!(chosen.name, "tight");
    }

    #[test]
    fn empty_candidates_yield_no_placement() {
        assert!(default_least_loaded().select(&[]).is_none());
    }
}
