//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Caches and stores key rows by this identifier; a snapshot copied out of
/// the store keeps the identity of the row it was copied from.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}
