//! Server package resolution.
//!
//! Cloud.dk sells virtual servers in fixed size classes identified by opaque
//! package IDs.  The ladder below maps a minimum (memory, processors) pair to
//! the cheapest package satisfying both; memory and processors are bucketed
//! independently and the greater index wins.

use crate::error::CsiError;

/// The fixed package ladder, cheapest first.
const SERVER_PACKAGE_IDS: [&str; 10] = [
    "ac949a1cb4731d",
    "89833c1dfa7010",
    "0469d586374e76",
    "e991abd8ef15c7",
    "489b7df86d4b76",
    "9559dbb4b71c45",
    "ebf313a9994c1e",
    "86fa7f6209ba2a",
    "25848db6009838",
    "115f1d99e8e9e4",
];

/// Upper memory bound (MB) of each ladder rung.
const MEMORY_BUCKETS: [(u32, usize); 10] = [
    (512, 0),
    (1024, 1),
    (2048, 2),
    (4096, 3),
    (6144, 4),
    (8192, 5),
    (16384, 6),
    (32768, 7),
    (65536, 8),
    (98304, 9),
];

/// Upper processor bound of each ladder rung; small packages share processor
/// counts, so the table is sparser than the memory one.
const PROCESSOR_BUCKETS: [(u32, usize); 8] = [
    (1, 0),
    (2, 3),
    (3, 4),
    (4, 5),
    (6, 6),
    (8, 7),
    (10, 8),
    (12, 9),
];

fn bucket_index(buckets: &[(u32, usize)], value: u32) -> Option<usize> {
    buckets.iter().find(|(limit, _)| value <= *limit).map(|(_, index)| *index)
}

/// Resolve the package ID for the given minimum hardware requirements.
///
/// Values beyond the top rung on either axis are unsupported.
pub fn resolve_package(memory_mb: u32, processors: u32) -> Result<&'static str, CsiError> {
    let memory_index = bucket_index(&MEMORY_BUCKETS, memory_mb).ok_or_else(|| {
        CsiError::InvalidArgument(format!("no supported package provides {memory_mb} MB of memory"))
    })?;

    let processor_index = bucket_index(&PROCESSOR_BUCKETS, processors).ok_or_else(|| {
        CsiError::InvalidArgument(format!("no supported package provides {processors} processors"))
    })?;

    Ok(SERVER_PACKAGE_IDS[memory_index.max(processor_index)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processors_dominate_small_memory() {
        // 2048 MB alone is index 2, but 4 processors require index 5.
        assert_eq!(resolve_package(2048, 4).unwrap(), SERVER_PACKAGE_IDS[5]);
    }

    #[test]
    fn memory_dominates_small_processor_count() {
        assert_eq!(resolve_package(98304, 1).unwrap(), SERVER_PACKAGE_IDS[9]);
    }

    #[test]
    fn bucket_edges_are_inclusive() {
        assert_eq!(resolve_package(512, 1).unwrap(), SERVER_PACKAGE_IDS[0]);
        assert_eq!(resolve_package(513, 1).unwrap(), SERVER_PACKAGE_IDS[1]);
        assert_eq!(resolve_package(4096, 2).unwrap(), SERVER_PACKAGE_IDS[3]);
        assert_eq!(resolve_package(98304, 12).unwrap(), SERVER_PACKAGE_IDS[9]);
    }

    #[test]
    fn out_of_ladder_values_are_rejected() {
        assert!(matches!(resolve_package(100_000, 1), Err(CsiError::InvalidArgument(_))));
        assert!(matches!(resolve_package(4096, 13), Err(CsiError::InvalidArgument(_))));
    }

    #[test]
    fn resolution_is_monotonic() {
        let ladder_position = |id: &str| {
            SERVER_PACKAGE_IDS.iter().position(|p| *p == id).expect("known package")
        };

        let samples =
            [(256, 1), (1024, 2), (2048, 3), (4096, 4), (8192, 6), (32768, 8), (98304, 12)];

        for window in samples.windows(2) {
            let (m1, p1) = window[0];
            let (m2, p2) = window[1];
            let first = ladder_position(resolve_package(m1, p1).unwrap());
            let second = ladder_position(resolve_package(m2, p2).unwrap());
            assert!(first <= second, "({m1},{p1}) -> {first} must not exceed ({m2},{p2}) -> {second}");
        }
    }
}
