//! The choreographic primitives and the protocols written against them.

use async_trait::async_trait;

use crate::error::Result;
use crate::located::{Located, MultiplyLocated};
use crate::location::Location;
use crate::payload::Portable;

/// The four operations a choreography is written in.
///
/// A choreography only ever talks to this trait. Which side of each
/// operation actually runs (compute, send, receive or skip) is decided by the
/// implementation, based on the location it was projected onto.
#[async_trait]
pub trait ChoreoOp: Send + Sync {
    /// Run `compute` at `owner`.
    ///
    /// On `owner`'s projection the closure runs exactly once and its result is
    /// located there; everywhere else the closure is dropped unrun and an
    /// empty placeholder is returned.
    fn locally<T, F>(&self, owner: &Location, compute: F) -> Result<Located<T>>
    where
        T: Send,
        F: FnOnce() -> Result<T>;

    /// Move `data` from `sender` to `receiver`.
    async fn comm<T: Portable>(
        &self,
        sender: &Location,
        receiver: &Location,
        data: &Located<T>,
    ) -> Result<Located<T>>;

    /// Send `data` from `sender` to every other location; every projection
    /// gets the value back.
    async fn broadcast<T: Portable>(&self, sender: &Location, data: &Located<T>) -> Result<T>;

    /// Send `data` from `sender` to each of `destinations`.
    async fn multicast<T: Portable>(
        &self,
        sender: &Location,
        destinations: &[Location],
        data: &Located<T>,
    ) -> Result<MultiplyLocated<T>>;
}

/// A global protocol, written once and run unchanged by every participant.
#[async_trait]
pub trait Choreography: Send + Sync {
    type Output: Send;

    async fn run<Op: ChoreoOp>(&self, op: &Op) -> Result<Self::Output>;
}
