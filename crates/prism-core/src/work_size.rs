use std::collections::HashSet;
use std::hash::Hash;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Limits a launch must fit, taken from a function entry on one device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalLimits {
    pub max_local_size: [u32; 3],
    pub max_total_local_size: u32,
    /// 0 = any.
    pub required_simd_width: u32,
    /// `[0, 0, 0]` = any.
    pub required_local_size: [u32; 3],
}

/// Work sizes after normalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchDims {
    pub dim: u32,
    pub global: [u32; 3],
    pub local: [u32; 3],
    pub groups: [u32; 3],
}

impl LaunchDims {
    pub fn local_count(&self) -> u32 {
        self.local.iter().product()
    }

    pub fn group_count(&self) -> u64 {
        self.groups.iter().map(|g| u64::from(*g)).product()
    }
}

/// Outcome of [`normalize_work_size`]; `coerced` is set when an empty global dimension was
/// raised to 1 or the caller's local size was changed for a reason other than "backend chooses".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NormalizedWorkSize {
    pub dims: LaunchDims,
    pub coerced: bool,
}

fn default_local(dim: u32) -> [u32; 3] {
    match dim {
        1 => [256, 1, 1],
        2 => [16, 16, 1],
        _ => [8, 8, 4],
    }
}

/// Turns a requested `(global, local)` pair into launch dimensions the device supports.
///
/// Components past `dim` are forced to 1, as are empty global components. A local size of all
/// zeros lets the backend choose; individual zero components become 1. Each local dimension is then clamped in x, y, z order to
/// `min(local[i], max_local[i], max_total / product of earlier dims)`, so the total never exceeds
/// `max_total_local_size`. Global sizes are rounded up to a multiple of the local size.
pub fn normalize_work_size(
    dim: u32,
    global: [u32; 3],
    local: [u32; 3],
    limits: &LocalLimits,
) -> Result<NormalizedWorkSize> {
    if !(1..=3).contains(&dim) {
        return Err(Error::invalid_argument(format!(
            "work dimension {dim} is outside 1..=3"
        )));
    }
    let used = dim as usize;
    let mut global = global;
    let mut local = local;
    for i in used..3 {
        global[i] = 1;
        local[i] = 1;
    }
    let mut coerced = false;
    for g in &mut global {
        if *g == 0 {
            *g = 1;
            coerced = true;
        }
    }

    let requested = local;
    if limits.required_local_size != [0; 3] {
        if local[..used].iter().any(|l| *l != 0) && local != limits.required_local_size {
            coerced = true;
        }
        local = limits.required_local_size;
    } else if local[..used].iter().all(|l| *l == 0) {
        local = default_local(dim);
        for i in used..3 {
            local[i] = 1;
        }
    } else {
        for l in &mut local {
            if *l == 0 {
                *l = 1;
                coerced = true;
            }
        }
    }

    let max_total = limits.max_total_local_size.max(1);
    let mut product = 1u32;
    for i in 0..3 {
        let cap = (max_total / product)
            .min(limits.max_local_size[i].max(1))
            .max(1);
        if local[i] > cap {
            local[i] = cap;
            if requested[i] != 0 {
                coerced = true;
            }
        }
        product = product.saturating_mul(local[i]);
    }

    if limits.required_simd_width > 1 && local[0] % limits.required_simd_width != 0 {
        return Err(Error::invalid_argument(format!(
            "local size x = {} is not a multiple of the required SIMD width {}",
            local[0], limits.required_simd_width
        )));
    }

    let mut groups = [1u32; 3];
    for i in 0..3 {
        groups[i] = global[i].div_ceil(local[i]);
        let rounded = groups[i].checked_mul(local[i]).ok_or_else(|| {
            Error::invalid_argument(format!("global work size {global:?} overflows"))
        })?;
        global[i] = rounded;
    }

    Ok(NormalizedWorkSize {
        dims: LaunchDims {
            dim,
            global,
            local,
            groups,
        },
        coerced,
    })
}

/// Remembers which keys have already been reported so a warning is logged once per key.
#[derive(Debug)]
pub struct WarnOnce<K> {
    seen: Mutex<HashSet<K>>,
}

impl<K> Default for WarnOnce<K> {
    fn default() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }
}

impl<K: Eq + Hash> WarnOnce<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time `key` is seen.
    pub fn first(&self, key: K) -> bool {
        self.seen.lock().insert(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.seen.lock().contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn limits(max_local: [u32; 3], max_total: u32) -> LocalLimits {
        LocalLimits {
            max_local_size: max_local,
            max_total_local_size: max_total,
            required_simd_width: 0,
            required_local_size: [0; 3],
        }
    }

    #[test]
    fn oversize_local_is_clamped_to_max_total() {
        let l = limits([1024, 1024, 64], 1024);
        let n = normalize_work_size(1, [4096, 0, 0], [1025, 1, 1], &l).unwrap();
        assert!(n.coerced);
        assert_eq!(n.dims.local, [1024, 1, 1]);
        assert_eq!(n.dims.groups, [4, 1, 1]);
    }

    #[test]
    fn clamping_keeps_total_within_limit() {
        let l = limits([64, 64, 64], 256);
        let n = normalize_work_size(3, [64, 64, 64], [32, 32, 32], &l).unwrap();
        assert_eq!(n.dims.local, [32, 8, 1]);
        assert!(n.dims.local_count() <= 256);
    }

    #[test]
    fn zero_local_means_backend_chooses() {
        let l = limits([1024, 1024, 64], 1024);
        let n = normalize_work_size(2, [100, 30, 9], [0, 0, 0], &l).unwrap();
        assert!(!n.coerced);
        assert_eq!(n.dims.local, [16, 16, 1]);
        // Global rounds up to a multiple of local; unused dims collapse to 1.
        assert_eq!(n.dims.global, [112, 32, 1]);
        assert_eq!(n.dims.groups, [7, 2, 1]);
    }

    #[test]
    fn single_zero_component_becomes_one() {
        let l = limits([1024, 1024, 64], 1024);
        let n = normalize_work_size(2, [8, 8, 1], [8, 0, 0], &l).unwrap();
        assert!(n.coerced);
        assert_eq!(n.dims.local, [8, 1, 1]);
    }

    #[test]
    fn simd_width_and_required_local_size() {
        let mut l = limits([256, 256, 64], 256);
        l.required_simd_width = 8;
        assert!(normalize_work_size(1, [64, 1, 1], [12, 1, 1], &l).is_err());
        assert!(normalize_work_size(1, [64, 1, 1], [16, 1, 1], &l).is_ok());

        l.required_local_size = [32, 1, 1];
        let n = normalize_work_size(1, [64, 1, 1], [16, 1, 1], &l).unwrap();
        assert!(n.coerced);
        assert_eq!(n.dims.local, [32, 1, 1]);
    }

    #[test]
    fn empty_global_dimension_becomes_one() {
        let l = limits([256, 256, 64], 256);
        let n = normalize_work_size(1, [0, 1, 1], [0; 3], &l).unwrap();
        assert!(n.coerced);
        assert_eq!(n.dims.global, [256, 1, 1]);
        assert_eq!(n.dims.groups, [1, 1, 1]);

        let n = normalize_work_size(2, [8, 0, 1], [8, 8, 1], &l).unwrap();
        assert_eq!(n.dims.global, [8, 8, 1]);
        assert_eq!(n.dims.groups, [1, 1, 1]);
    }

    #[test]
    fn bad_dim_is_rejected() {
        let l = limits([256, 256, 64], 256);
        assert!(normalize_work_size(0, [8, 8, 8], [0; 3], &l).is_err());
        assert!(normalize_work_size(4, [8, 8, 8], [0; 3], &l).is_err());
    }

    #[test]
    fn warn_once_per_key() {
        let w = WarnOnce::new();
        assert!(w.first(("add", 0)));
        assert!(!w.first(("add", 0)));
        assert!(w.first(("add", 1)));
        assert!(w.contains(&("add", 0)));
        assert!(!w.contains(&("scale", 0)));
    }
}
