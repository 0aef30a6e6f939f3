//! Domain identifiers (strongly-typed IDs).
//!
//! Job ids are ULIDs wrapped in a phantom-typed `Id<T>`, so they sort by creation
//! time and cannot be confused with any other id type. Driver ids are plain names
//! taken from configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for id types. Supplies the `Display` prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed id.
///
/// `T` only exists at compile time; `Id<T>` has the same size as a `Ulid`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Marker for job ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobMarker {}

impl IdMarker for JobMarker {
    fn prefix() -> &'static str {
        "job-"
    }
}

/// Identifier of a job (one unit of chainable work on a driver lane).
pub type JobId = Id<JobMarker>;

/// Name of a driver lane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverId(String);

impl DriverId {
    /// Reserved lane that receives `on_destination` follow-on jobs.
    pub const DESTINATION: &'static str = "destination";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn destination() -> Self {
        Self::new(Self::DESTINATION)
    }

    pub fn is_destination(&self) -> bool {
        self.0 == Self::DESTINATION
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DriverId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
