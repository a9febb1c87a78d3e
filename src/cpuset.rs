// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! CPU id sets and Linux-cpulist parsing/formatting.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A logical CPU id, as numbered by the host.
pub type CpuId = u32;

/// An ordered set of CPU ids.
///
/// Formats as a Linux cpulist (`"0-2,5"`) and parses from the same syntax.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuSet(BTreeSet<CpuId>);

impl CpuSet {
    /// Returns an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `cpu` is in the set.
    pub fn contains(&self, cpu: CpuId) -> bool {
        self.0.contains(&cpu)
    }

    /// Adds `cpu`, returning true if it was not already present.
    pub fn insert(&mut self, cpu: CpuId) -> bool {
        self.0.insert(cpu)
    }

    /// Removes `cpu`, returning true if it was present.
    pub fn remove(&mut self, cpu: CpuId) -> bool {
        self.0.remove(&cpu)
    }

    /// Returns true if the set has no CPUs.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of CPUs in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates the CPUs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = CpuId> + '_ {
        self.0.iter().copied()
    }

    /// Returns `self \ other`.
    pub fn and_not(&self, other: &CpuSet) -> CpuSet {
        CpuSet(self.0.difference(&other.0).copied().collect())
    }

    /// Returns `self ∪ other`.
    pub fn union(&self, other: &CpuSet) -> CpuSet {
        CpuSet(self.0.union(&other.0).copied().collect())
    }

    /// Returns true if every CPU in `self` is also in `other`.
    pub fn is_subset(&self, other: &CpuSet) -> bool {
        self.0.is_subset(&other.0)
    }
}

impl FromIterator<CpuId> for CpuSet {
    fn from_iter<T: IntoIterator<Item = CpuId>>(iter: T) -> Self {
        CpuSet(iter.into_iter().collect())
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut iter = self.0.iter().copied().peekable();
        while let Some(start) = iter.next() {
            let mut end = start;
            while let Some(&next) = iter.peek() {
                if next != end + 1 {
                    break;
                }
                end = next;
                iter.next();
            }
            if !first {
                write!(f, ",")?;
            }
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
            first = false;
        }
        Ok(())
    }
}

/// A malformed cpulist string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CpuListParseError {
    #[error("invalid cpu id {0:?}")]
    InvalidCpu(String),
    #[error("invalid cpu range {0}-{1}")]
    InvalidRange(CpuId, CpuId),
}

impl FromStr for CpuSet {
    type Err = CpuListParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = CpuSet::new();
        let s = s.trim();
        if s.is_empty() {
            return Ok(set);
        }
        for part in s.split(',') {
            let part = part.trim();
            match part.split_once('-') {
                Some((start, end)) => {
                    let start: CpuId = start
                        .parse()
                        .map_err(|_| CpuListParseError::InvalidCpu(part.to_owned()))?;
                    let end: CpuId = end
                        .parse()
                        .map_err(|_| CpuListParseError::InvalidCpu(part.to_owned()))?;
                    if start > end {
                        return Err(CpuListParseError::InvalidRange(start, end));
                    }
                    for cpu in start..=end {
                        set.insert(cpu);
                    }
                }
                None => {
                    set.insert(
                        part.parse()
                            .map_err(|_| CpuListParseError::InvalidCpu(part.to_owned()))?,
                    );
                }
            }
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(cpus: &[CpuId]) -> CpuSet {
        cpus.iter().copied().collect()
    }

    #[test]
    fn parse_single_cpus() {
        assert_eq!("3".parse::<CpuSet>().unwrap(), set(&[3]));
        assert_eq!("0,2,5".parse::<CpuSet>().unwrap(), set(&[0, 2, 5]));
    }

    #[test]
    fn parse_ranges() {
        assert_eq!("2-3".parse::<CpuSet>().unwrap(), set(&[2, 3]));
        assert_eq!("0,4-6,9".parse::<CpuSet>().unwrap(), set(&[0, 4, 5, 6, 9]));
    }

    #[test]
    fn parse_tolerates_whitespace() {
        assert_eq!("2-3\n".parse::<CpuSet>().unwrap(), set(&[2, 3]));
        assert_eq!(" 1, 3 ".parse::<CpuSet>().unwrap(), set(&[1, 3]));
    }

    #[test]
    fn parse_empty_is_empty_set() {
        assert_eq!("".parse::<CpuSet>().unwrap(), CpuSet::new());
        assert_eq!("\n".parse::<CpuSet>().unwrap(), CpuSet::new());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(
            "a".parse::<CpuSet>(),
            Err(CpuListParseError::InvalidCpu("a".to_owned()))
        );
        assert_eq!(
            "1,,3".parse::<CpuSet>(),
            Err(CpuListParseError::InvalidCpu("".to_owned()))
        );
        assert_eq!(
            "2-x".parse::<CpuSet>(),
            Err(CpuListParseError::InvalidCpu("2-x".to_owned()))
        );
    }

    #[test]
    fn parse_rejects_reversed_range() {
        assert_eq!(
            "5-2".parse::<CpuSet>(),
            Err(CpuListParseError::InvalidRange(5, 2))
        );
    }

    #[test]
    fn display_cpulist() {
        assert_eq!(set(&[]).to_string(), "");
        assert_eq!(set(&[4]).to_string(), "4");
        assert_eq!(set(&[0, 1, 2, 5]).to_string(), "0-2,5");
        assert_eq!(set(&[1, 3, 4, 5, 8, 9]).to_string(), "1,3-5,8-9");
    }

    #[test]
    fn set_operations() {
        let a = set(&[1, 2, 3]);
        let b = set(&[2, 4]);
        assert_eq!(a.and_not(&b), set(&[1, 3]));
        assert_eq!(a.union(&b), set(&[1, 2, 3, 4]));
        assert!(set(&[2, 3]).is_subset(&a));
        assert!(!b.is_subset(&a));
    }
}
