//! Values owned by one or several locations.

use std::collections::BTreeMap;

use crate::error::{ChoreographyError, Result};
use crate::location::Location;

/// A value known at a single location.
///
/// On every projection other than the owner's the value is an empty
/// placeholder; reading it yields [`ChoreographyError::Absent`].
#[derive(Debug, Clone, PartialEq)]
pub struct Located<T> {
    value: Option<T>,
    location: Location,
}

impl<T> Located<T> {
    /// A value present at `location`.
    pub fn local(value: T, location: Location) -> Self {
        Self {
            value: Some(value),
            location,
        }
    }

    /// The placeholder for a value owned by `location` but not known here.
    pub fn remote(location: Location) -> Self {
        Self {
            value: None,
            location,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// The value, if this projection knows it.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    /// Borrow the value, failing on a placeholder.
    pub fn get(&self) -> Result<&T> {
        self.value.as_ref().ok_or_else(|| ChoreographyError::Absent {
            location: self.location.clone(),
        })
    }

    /// Take the value, failing on a placeholder.
    pub fn into_value(self) -> Result<T> {
        let location = self.location;
        self.value
            .ok_or(ChoreographyError::Absent { location })
    }
}

/// A value visible at a set of locations after a multicast.
///
/// Keys are exactly the multicast destinations; destinations that the current
/// projection did not reach map to absent.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiplyLocated<T> {
    values: BTreeMap<Location, Option<T>>,
}

impl<T> MultiplyLocated<T> {
    pub(crate) fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, location: Location, value: Option<T>) {
        self.values.insert(location, value);
    }

    /// The value recorded for `location`, or `None` when absent.
    pub fn get(&self, location: &Location) -> Option<&T> {
        self.values.get(location).and_then(Option::as_ref)
    }

    /// Whether `location` was one of the destinations.
    pub fn contains(&self, location: &Location) -> bool {
        self.values.contains_key(location)
    }

    /// Destinations, in name order.
    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.values.keys()
    }

    /// Number of destinations whose value is known on this projection.
    pub fn present_count(&self) -> usize {
        self.values.values().filter(|v| v.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Location = Location::from_static("Alice");
    const BOB: Location = Location::from_static("Bob");

    #[test]
    fn placeholder_reads_fail_without_panicking() {
        let remote: Located<u32> = Located::remote(ALICE);
        assert!(!remote.is_present());
        assert!(matches!(
            remote.get(),
            Err(ChoreographyError::Absent { location }) if location == ALICE
        ));
        assert!(remote.into_value().is_err());
    }

    #[test]
    fn multiply_located_distinguishes_absent_from_unknown() {
        let mut ml = MultiplyLocated::new();
        ml.insert(ALICE, Some(7));
        ml.insert(BOB, None);

        assert_eq!(ml.get(&ALICE), Some(&7));
        assert_eq!(ml.get(&BOB), None);
        assert!(ml.contains(&BOB));
        assert!(!ml.contains(&Location::from_static("Carol")));
        assert_eq!(ml.present_count(), 1);
        assert_eq!(ml.locations().cloned().collect::<Vec<_>>(), vec![ALICE, BOB]);
    }
}
