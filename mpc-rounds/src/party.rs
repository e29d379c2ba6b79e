//! Party identities
//!
//! Every participant of a protocol is identified by a [`PartyId`]. The set of participants of
//! a session is a [`PartyIdSlice`]: sorted, without duplicates, and fixed for the whole session.
//! The order matters, protocols may derive deterministic indexes from a party position.
//!
//! ```rust
//! use mpc_rounds::party::{PartyId, PartyIdSlice};
//!
//! # fn main() -> Result<(), mpc_rounds::ConstructionError> {
//! let ids = PartyIdSlice::new(["c", "a", "b"])?;
//! assert_eq!(ids.index_of(&PartyId::from("b")), Some(1));
//! assert_eq!(ids.without(&PartyId::from("a")).len(), 2);
//! # Ok(()) }
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::ops;

use serde::{Deserialize, Serialize};

use crate::error::ConstructionError;

/// Identity of a party
///
/// Opaque token (typically a short string), compared and ordered lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(String);

impl PartyId {
    /// Wraps a string into party identity
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns identity as bytes
    ///
    /// Used by protocols that bind identities into hashes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartyId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for PartyId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for PartyId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Sorted set of party identities
///
/// Guaranteed to be non-empty, sorted in ascending order and to contain no duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<PartyId>", into = "Vec<PartyId>")]
pub struct PartyIdSlice(Vec<PartyId>);

impl PartyIdSlice {
    /// Constructs a party set
    ///
    /// Identities are sorted. Returns error if the list is empty, contains an empty identity, or
    /// contains the same identity twice.
    pub fn new<I, P>(ids: I) -> Result<Self, ConstructionError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PartyId>,
    {
        let mut ids: Vec<PartyId> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Err(ConstructionError::EmptyPartySet);
        }
        if ids.iter().any(|id| id.0.is_empty()) {
            return Err(ConstructionError::EmptyPartyId);
        }
        ids.sort();
        if let Some(w) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConstructionError::DuplicateParty(w[0].clone()));
        }
        Ok(Self(ids))
    }

    /// Number of parties
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`: a party set cannot be empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks whether `id` belongs to the set
    pub fn contains(&self, id: &PartyId) -> bool {
        self.0.binary_search(id).is_ok()
    }

    /// Position of `id` in the set (`0 <= i < n`)
    pub fn index_of(&self, id: &PartyId) -> Option<usize> {
        self.0.binary_search(id).ok()
    }

    /// Returns all parties except `id`, preserving the order
    pub fn without(&self, id: &PartyId) -> Vec<PartyId> {
        self.0.iter().filter(|p| *p != id).cloned().collect()
    }

    /// Checks whether every party of `self` belongs to `other`
    pub fn is_subset_of(&self, other: &PartyIdSlice) -> bool {
        self.0.iter().all(|id| other.contains(id))
    }

    /// Returns the first `n` parties
    ///
    /// Returns `None` if `n` is zero or exceeds the set size.
    pub fn take(&self, n: usize) -> Option<PartyIdSlice> {
        if n == 0 || n > self.0.len() {
            None
        } else {
            Some(Self(self.0[..n].to_vec()))
        }
    }

    /// Returns parties as a slice
    pub fn as_slice(&self) -> &[PartyId] {
        &self.0
    }

    /// Iterates over parties in ascending order
    pub fn iter(&self) -> std::slice::Iter<'_, PartyId> {
        self.0.iter()
    }
}

impl ops::Deref for PartyIdSlice {
    type Target = [PartyId];

    fn deref(&self) -> &[PartyId] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a PartyIdSlice {
    type Item = &'a PartyId;
    type IntoIter = std::slice::Iter<'a, PartyId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl TryFrom<Vec<PartyId>> for PartyIdSlice {
    type Error = ConstructionError;

    fn try_from(ids: Vec<PartyId>) -> Result<Self, Self::Error> {
        Self::new(ids)
    }
}

impl From<PartyIdSlice> for Vec<PartyId> {
    fn from(ids: PartyIdSlice) -> Self {
        ids.0
    }
}

impl fmt::Display for PartyIdSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(id.as_str())?;
        }
        f.write_str("}")
    }
}

/// Checks that threshold `t` is valid for `n` parties, i.e. `0 <= t < n`
///
/// `t + 1` parties are needed to complete a signing.
pub fn validate_threshold(threshold: usize, n: usize) -> Result<(), ConstructionError> {
    if threshold < n {
        Ok(())
    } else {
        Err(ConstructionError::InvalidThreshold {
            threshold,
            parties: n,
        })
    }
}

#[cfg(test)]
mod tests {
    use matches::assert_matches;

    use super::*;

    #[test]
    fn party_set_is_sorted() {
        let ids = PartyIdSlice::new(["e", "b", "d", "a", "c"]).unwrap();
        let ids: Vec<&str> = ids.iter().map(PartyId::as_str).collect();
        assert_eq!(ids, ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn duplicates_are_rejected() {
        let err = PartyIdSlice::new(["a", "b", "a"]).unwrap_err();
        assert_eq!(err, ConstructionError::DuplicateParty(PartyId::from("a")));
    }

    #[test]
    fn empty_sets_and_ids_are_rejected() {
        assert_matches!(
            PartyIdSlice::new(Vec::<PartyId>::new()),
            Err(ConstructionError::EmptyPartySet)
        );
        assert_matches!(
            PartyIdSlice::new(["a", ""]),
            Err(ConstructionError::EmptyPartyId)
        );
    }

    #[test]
    fn lookups() {
        let ids = PartyIdSlice::new(["a", "b", "c"]).unwrap();
        let b = PartyId::from("b");
        assert!(ids.contains(&b));
        assert!(!ids.contains(&PartyId::from("z")));
        assert_eq!(ids.index_of(&b), Some(1));
        assert_eq!(ids.without(&b), [PartyId::from("a"), PartyId::from("c")]);

        let first_two = ids.take(2).unwrap();
        assert!(first_two.is_subset_of(&ids));
        assert!(!ids.is_subset_of(&first_two));
        assert!(ids.take(0).is_none());
        assert!(ids.take(4).is_none());
        assert_eq!(ids.to_string(), "{a,b,c}");
    }

    #[test]
    fn threshold_must_be_less_than_parties() {
        assert!(validate_threshold(0, 1).is_ok());
        assert!(validate_threshold(4, 5).is_ok());
        assert_matches!(
            validate_threshold(5, 5),
            Err(ConstructionError::InvalidThreshold {
                threshold: 5,
                parties: 5
            })
        );
    }
}
