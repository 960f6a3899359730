//! Entity trait: identity that survives state changes.

/// Entity marker + minimal interface.
///
/// Users and roles are entities: two instances with the same identifier refer
/// to the same stored row even when their loaded fields differ.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;

    /// Human-readable code name (user name, role name).
    fn code_name(&self) -> &str;
}
