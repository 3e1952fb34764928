const DEFAULT_BLOCK_SIZE: usize = 1000;

/// Split `[0, ntot)` into `(lb, ub)` block intervals for parallel jobs
pub fn create_jobs(ntot: usize, block_size: Option<usize>) -> Vec<(usize, usize)> {
    let block_size = match block_size {
        Some(0) | None => DEFAULT_BLOCK_SIZE,
        Some(b) => b,
    };
    let nblock = ntot.div_ceil(block_size);
    (0..nblock)
        .map(|block| {
            let lb = block * block_size;
            let ub = ((block + 1) * block_size).min(ntot);
            (lb, ub)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_jobs() {
        assert_eq!(create_jobs(10, Some(3)), vec![(0, 3), (3, 6), (6, 9), (9, 10)]);
        assert_eq!(create_jobs(6, Some(3)), vec![(0, 3), (3, 6)]);
        assert_eq!(create_jobs(1, Some(100)), vec![(0, 1)]);
        assert_eq!(create_jobs(5, Some(0)), vec![(0, 5)]);
        assert_eq!(create_jobs(0, Some(3)), vec![]);
    }
}
