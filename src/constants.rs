/// Maximum number of live memory registrations per agent.
pub(crate) const MAX_REG_CNT: usize = 8192;
/// Number of key bits holding the registration index.
pub(crate) const REG_KEY_IDX_PART_WIDTH: u32 = 13; // log2(MAX_REG_CNT)
/// Number of key bits holding the random part.
pub(crate) const REG_KEY_KEY_PART_WIDTH: u32 = 32 - REG_KEY_IDX_PART_WIDTH;

/// Number of descriptors built by the benchmark.
pub const BENCH_DESC_COUNT: usize = 24 * 64 * 1024;
/// Size of the region every benchmark descriptor points into.
pub const BENCH_REGION_LEN: usize = 256;
