use nix::sched::{sched_getaffinity, CpuSet};
use nix::unistd::Pid;

/// Builds `n_workers` disjoint core masks of `n_cores_per_worker` contiguous
/// cores starting at `core_offset`, restricted to even offsets/widths so
/// hyperthread siblings stay paired (same shape as the worker pool affinity
/// helper this is grounded on). Used by [`crate::EventProcessor`] to pin a
/// named thread group to specific cores when the caller wants isolation
/// from the rest of the process.
pub fn cpuset(
    core_offset: usize,
    n_workers: usize,
    n_cores_per_worker: usize,
) -> nix::Result<Vec<CpuSet>> {
    if core_offset % 2 == 1 {
        return Err(nix::errno::Errno::EINVAL);
    }
    if n_cores_per_worker % 2 == 1 {
        return Err(nix::errno::Errno::EINVAL);
    }
    let all = sched_getaffinity(Pid::from_raw(0))?;
    let mut ret = Vec::with_capacity(n_workers);
    for i in 0..n_workers {
        let mut c = CpuSet::new();
        for j in 0..n_cores_per_worker {
            let k = core_offset + i * n_cores_per_worker + j;
            if !all.is_set(k)? {
                return Err(nix::errno::Errno::ENAVAIL);
            }
            c.set(k)?;
        }
        ret.push(c);
    }
    Ok(ret)
}

/// One mask covering `begin..=end` (or `begin..` when `end` is `None`),
/// replicated `n_workers` times so every worker may run on any core in the
/// range.
pub fn cpuset_range(begin: usize, end: Option<usize>) -> nix::Result<CpuSet> {
    let all = sched_getaffinity(Pid::from_raw(0))?;
    let mut c = CpuSet::new();
    let end = end.unwrap_or(CpuSet::count() - 1);
    for k in begin..=end {
        if all.is_set(k)? {
            c.set(k)?;
        }
    }
    Ok(c)
}

pub fn cpuset_replicate(mask: &CpuSet, n_workers: usize) -> Vec<CpuSet> {
    (0..n_workers).map(|_| *mask).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpuset_rejects_odd_offset_or_width() {
        assert!(cpuset(1, 1, 2).is_err());
        assert!(cpuset(0, 1, 1).is_err());
    }

    #[test]
    fn cpuset_range_replicate_has_n_entries() {
        let mask = cpuset_range(0, Some(0)).unwrap();
        let v = cpuset_replicate(&mask, 4);
        assert_eq!(v.len(), 4);
    }
}
