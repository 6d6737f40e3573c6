//! Shard allocation strategies
//!
//! A strategy maps the job's shard items onto the currently available
//! instances. The leader runs it during every reshard and writes the result
//! to the store; strategies are pure and deterministic.
//!
//! | Strategy | Behaviour |
//! |---|---|
//! | [`AverageAllocation`] | contiguous blocks, remainder to the first instances |
//! | [`OdevitySortByName`] | average over instances ordered by the parity of the job name hash |
//! | [`RotateServerByName`] | average over instances rotated by the job name hash |

use serde::{Deserialize, Serialize};

use crate::coordinator::instance::JobInstance;

/// Assignment produced by a strategy, one entry per instance in input order
pub type ShardingResult = Vec<(JobInstance, Vec<u32>)>;

/// Allocates shard items to instances
pub trait ShardingStrategy: Send + Sync {
    /// Split `0..sharding_total_count` across `instances`
    ///
    /// `instances` is sorted ascending by id. Every item is assigned exactly
    /// once; an empty instance list yields an empty result.
    fn sharding(
        &self,
        instances: &[JobInstance],
        job_name: &str,
        sharding_total_count: u32,
    ) -> ShardingResult;
}

/// Strategy selector stored in the job configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardingStrategyType {
    /// [`AverageAllocation`]
    #[default]
    Average,
    /// [`OdevitySortByName`]
    OdevitySortByName,
    /// [`RotateServerByName`]
    RotateServerByName,
}

impl ShardingStrategyType {
    /// Instantiate the strategy
    pub fn create(&self) -> Box<dyn ShardingStrategy> {
        match self {
            Self::Average => Box::new(AverageAllocation),
            Self::OdevitySortByName => Box::new(OdevitySortByName),
            Self::RotateServerByName => Box::new(RotateServerByName),
        }
    }
}

// ============================================================================
// Average
// ============================================================================

/// Even split in contiguous blocks
///
/// With `q = total / n` and `r = total % n`, instance `k` receives
/// `[k*q, (k+1)*q)` and remainder item `q*n + j` goes to instance `j` for
/// `j < r`. For 5 items over `[A, B, C]` that is `A:[0,3] B:[1,4] C:[2]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AverageAllocation;

impl ShardingStrategy for AverageAllocation {
    fn sharding(
        &self,
        instances: &[JobInstance],
        _job_name: &str,
        sharding_total_count: u32,
    ) -> ShardingResult {
        if instances.is_empty() {
            return Vec::new();
        }

        let n = instances.len() as u32;
        let per_instance = sharding_total_count / n;
        let remainder = sharding_total_count % n;

        instances
            .iter()
            .enumerate()
            .map(|(k, instance)| {
                let k = k as u32;
                let mut items: Vec<u32> = (k * per_instance..(k + 1) * per_instance).collect();
                if k < remainder {
                    items.push(per_instance * n + k);
                }
                (instance.clone(), items)
            })
            .collect()
    }
}

// ============================================================================
// Odevity
// ============================================================================

/// Average allocation over instances sorted ascending when the job name hash
/// is odd and descending when it is even
///
/// Spreads small jobs across different instances instead of always loading
/// the lowest ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct OdevitySortByName;

impl ShardingStrategy for OdevitySortByName {
    fn sharding(
        &self,
        instances: &[JobInstance],
        job_name: &str,
        sharding_total_count: u32,
    ) -> ShardingResult {
        let mut ordered = instances.to_vec();
        if name_hash(job_name) % 2 == 0 {
            ordered.reverse();
        }
        AverageAllocation.sharding(&ordered, job_name, sharding_total_count)
    }
}

// ============================================================================
// Rotate
// ============================================================================

/// Average allocation over instances rotated left by `|hash(job_name)| % n`
#[derive(Debug, Clone, Copy, Default)]
pub struct RotateServerByName;

impl ShardingStrategy for RotateServerByName {
    fn sharding(
        &self,
        instances: &[JobInstance],
        job_name: &str,
        sharding_total_count: u32,
    ) -> ShardingResult {
        if instances.is_empty() {
            return Vec::new();
        }

        let offset = (name_hash(job_name).unsigned_abs() as usize) % instances.len();
        let mut rotated = instances.to_vec();
        rotated.rotate_left(offset);
        AverageAllocation.sharding(&rotated, job_name, sharding_total_count)
    }
}

/// Polynomial string hash (`h = 31*h + c` over UTF-16 units, wrapping i32)
///
/// Kept stable across platforms so every instance derives the same order.
pub fn name_hash(name: &str) -> i32 {
    name.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}
