//! Descriptor list construction benchmark.
//!
//! Allocates one small host region, builds a descriptor list holding the same
//! descriptor `desc_count` times and reports the average build time per
//! descriptor.

use std::{
    fmt, iter,
    time::{Duration, Instant},
};

use log::{debug, info};

use crate::{
    agent::DescBuilder,
    constants::{BENCH_DESC_COUNT, BENCH_REGION_LEN},
    desc::Desc,
    error::{Result, XferError},
    mem::{MemType, Region, RegionAllocator},
};

/// Source of monotonic timestamps.
pub trait Clock {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Clock backed by `Instant::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Benchmark parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchParams {
    /// Number of descriptors to build
    pub desc_count: usize,
    /// Size of the region every descriptor points into
    pub region_len: usize,
    /// Device index of every descriptor
    pub dev_id: u64,
    /// Memory kind of the built list
    pub mem_type: MemType,
    /// Ask for a sorted list
    pub sorted: bool,
}

impl Default for BenchParams {
    fn default() -> Self {
        Self {
            desc_count: BENCH_DESC_COUNT,
            region_len: BENCH_REGION_LEN,
            dev_id: 0,
            mem_type: MemType::Dram,
            sorted: true,
        }
    }
}

/// Outcome of one benchmark run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchReport {
    /// Number of descriptors built
    pub desc_count: usize,
    /// Time spent building the list
    pub elapsed: Duration,
}

impl BenchReport {
    /// Average build time per descriptor in microseconds, `0.0` for an empty run.
    #[must_use]
    #[allow(clippy::as_conversions, clippy::cast_precision_loss)]
    pub fn us_per_desc(&self) -> f64 {
        if self.desc_count == 0 {
            return 0.0;
        }
        1_000_000.0 * self.elapsed.as_secs_f64() / self.desc_count as f64
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time per desc add in us: {}", self.us_per_desc())
    }
}

/// Drives one descriptor list construction benchmark.
#[derive(Debug)]
pub struct DescBench<'a, B, C, A> {
    builder: &'a B,
    clock: C,
    allocator: A,
}

impl<'a, B, C, A> DescBench<'a, B, C, A>
where
    B: DescBuilder,
    C: Clock,
    A: RegionAllocator,
{
    /// Creates a benchmark driving `builder`
    pub fn new(builder: &'a B, clock: C, allocator: A) -> Self {
        Self {
            builder,
            clock,
            allocator,
        }
    }

    /// Runs the benchmark once.
    ///
    /// The region is released on every return path.
    ///
    /// # Errors
    ///
    /// * `MemoryError` - the region could not be allocated
    /// * `CountMismatch` - the built list does not hold `desc_count` entries
    /// * any error returned by the builder
    pub fn run(&mut self, params: &BenchParams) -> Result<BenchReport> {
        let region = self.allocator.alloc(params.region_len).map_err(|err| {
            XferError::MemoryError(format!(
                "failed to allocate {} bytes: {err}",
                params.region_len
            ))
        })?;
        let desc = Desc::new(region.addr(), region.len(), params.dev_id);
        let descs: Vec<Desc> = iter::repeat(desc).take(params.desc_count).collect();
        debug!("built {} copies of {desc:?}", descs.len());

        let start = self.clock.now();
        let list = self
            .builder
            .get_xfer_descs(descs, params.mem_type, params.sorted)?;
        let end = self.clock.now();

        if list.desc_count() != params.desc_count {
            return Err(XferError::CountMismatch {
                expected: params.desc_count,
                actual: list.desc_count(),
            });
        }
        let report = BenchReport {
            desc_count: params.desc_count,
            elapsed: end.saturating_duration_since(start),
        };
        info!(
            "built {} descs in {:?}, {} us per desc",
            report.desc_count,
            report.elapsed,
            report.us_per_desc()
        );

        Ok(report)
    }
}
