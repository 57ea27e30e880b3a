//! Explicit instance identity for decorators and proxies.

use core::fmt;
use core::num::NonZeroU32;

/// Identity a caller assigns to a solver wrapper or proxy at construction.
///
/// Ids are plain values handed out by whoever builds the object graph; there
/// is no process-wide counter behind them. `NonZeroU32` keeps
/// `Option<InstanceId>` the size of a bare `u32`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(NonZeroU32);

impl InstanceId {
    /// Lowest id; a builder hands out the rest with [`InstanceId::next`].
    pub const FIRST: Self = Self(NonZeroU32::MIN);

    /// Wrap a raw id; zero is reserved and yields `None`.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// The following id, for sequential assignment.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_reserved() {
        assert!(InstanceId::new(0).is_none());
        assert_eq!(InstanceId::new(7).unwrap().get(), 7);
    }

    #[test]
    fn sequential_assignment() {
        let a = InstanceId::FIRST;
        let b = a.next();
        assert_ne!(a, b);
        assert_eq!(b.get(), a.get() + 1);
        assert_eq!(format!("{b}"), "2");
    }
}
