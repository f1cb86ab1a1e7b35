//! Identity types for routes.

use std::fmt;

/// Host-side handle of one realized route.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct RouteId(pub u32);

impl RouteId {
    /// Marker for bookkeeping not owned by any route (anonymous routes).
    pub const INVALID: RouteId = RouteId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn next(self) -> RouteId {
        RouteId(self.0.wrapping_add(1))
    }
}

impl fmt::Debug for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "RouteId(INVALID)")
        } else {
            write!(f, "RouteId({})", self.0)
        }
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Position of a stage in a route's pending list.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StageIndex(pub usize);

impl StageIndex {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_id() {
        let id = RouteId(41).next();
        assert_eq!(id, RouteId(42));
        assert!(id.is_valid());
        assert!(!RouteId::INVALID.is_valid());
        assert_eq!(format!("{}", RouteId::INVALID), "RouteId(INVALID)");
    }
}
