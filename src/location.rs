//! Protocol participants.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// A participant (role) in a choreography.
///
/// Locations are identified purely by name: two values built from the same
/// name are the same participant no matter how often they are constructed.
///
/// # Examples
///
/// ```
/// use choreo_epp::Location;
///
/// const BUYER: Location = Location::from_static("Buyer");
///
/// assert_eq!(BUYER, Location::new(String::from("Buyer")));
/// assert_eq!(BUYER.name(), "Buyer");
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(Cow<'static, str>);

impl Location {
    /// Create a location from an owned or borrowed name.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Location(name.into())
    }

    /// Create a location from a static name, usable in `const` items.
    pub const fn from_static(name: &'static str) -> Self {
        Location(Cow::Borrowed(name))
    }

    /// The stable name of this location.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location({})", self.0)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Location {
    fn from(name: &'static str) -> Self {
        Location::from_static(name)
    }
}

impl From<String> for Location {
    fn from(name: String) -> Self {
        Location::new(name)
    }
}

impl AsRef<str> for Location {
    fn as_ref(&self) -> &str {
        self.name()
    }
}
