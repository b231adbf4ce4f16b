//! NUMA topology queries
//!
//! The pool core treats topology as opaque: the node-sized factories
//! need exactly two answers per node: its CPU count and its CPU mask.
//! Both come from sysfs cpulist files ("0-3,8-11" syntax).

use std::path::Path;

use burstpool_core::CpuMask;

/// Number of NUMA nodes with CPUs, per sysfs. 1 on machines without a
/// node directory (everything is "node 0").
pub fn num_nodes() -> usize {
    let mut n = 0;
    while Path::new(&format!("/sys/devices/system/node/node{}", n)).exists() {
        n += 1;
    }
    n.max(1)
}

/// CPU mask of `node`, or None when the node does not exist.
pub fn node_cpu_mask(node: u32) -> Option<CpuMask> {
    let path = format!("/sys/devices/system/node/node{}/cpulist", node);
    let list = std::fs::read_to_string(path).ok()?;
    parse_cpulist(list.trim())
}

/// Number of CPUs on `node`, or None when the node does not exist.
pub fn node_cpu_count(node: u32) -> Option<usize> {
    node_cpu_mask(node).map(|m| m.count())
}

/// Parse kernel cpulist syntax: comma-separated entries, each a single
/// CPU or an inclusive range.
fn parse_cpulist(list: &str) -> Option<CpuMask> {
    let mut mask = CpuMask::empty();
    if list.is_empty() {
        return Some(mask);
    }
    for entry in list.split(',') {
        let entry = entry.trim();
        if let Some((lo, hi)) = entry.split_once('-') {
            let lo: usize = lo.parse().ok()?;
            let hi: usize = hi.parse().ok()?;
            if lo > hi {
                return None;
            }
            for cpu in lo..=hi {
                mask.set(cpu);
            }
        } else {
            mask.set(entry.parse().ok()?);
        }
    }
    Some(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single() {
        let m = parse_cpulist("3").unwrap();
        assert_eq!(m.count(), 1);
        assert!(m.contains(3));
    }

    #[test]
    fn test_parse_range() {
        let m = parse_cpulist("0-3").unwrap();
        assert_eq!(m.count(), 4);
        assert!(m.contains(0) && m.contains(3));
        assert!(!m.contains(4));
    }

    #[test]
    fn test_parse_mixed() {
        let m = parse_cpulist("0-3,8-11,16").unwrap();
        assert_eq!(m.count(), 9);
        assert!(m.contains(9));
        assert!(m.contains(16));
        assert!(!m.contains(4));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_cpulist("a-b").is_none());
        assert!(parse_cpulist("5-2").is_none());
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse_cpulist("").unwrap().count(), 0);
    }

    #[test]
    fn test_local_machine() {
        assert!(num_nodes() >= 1);
        if let Some(count) = node_cpu_count(0) {
            assert!(count >= 1);
            assert_eq!(node_cpu_mask(0).unwrap().count(), count);
        }
    }
}
