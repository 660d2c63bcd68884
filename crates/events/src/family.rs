use hearth_core::FamilyId;

use crate::DomainEvent;

/// Helper trait for family-scoped messages.
///
/// Marks types that carry a family id, enabling family-aware processing in
/// infrastructure components (workers, stores, filters).
///
/// ## Use Cases
///
/// - **Message filtering**: drop events from other families in subscription
///   loops pinned to one family (defense in depth)
/// - **Isolation checks**: stores compare the caller's family against the
///   record's before returning it
pub trait FamilyScoped {
    fn family_id(&self) -> FamilyId;
}

impl FamilyScoped for DomainEvent {
    fn family_id(&self) -> FamilyId {
        self.family_id()
    }
}
