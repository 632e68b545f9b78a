//! Entity implementation

slotmap::new_key_type! {
    /// Generational entity identifier; stale ids never alias a newer entity
    pub struct Entity;
}
