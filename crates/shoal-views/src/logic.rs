//! Domain logic hook run on owned entities

use bytes::Bytes;
use shoal_core::FieldMap;

/// Changes domain logic wants published for one entity
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityPatch {
    pub fields: FieldMap,
    pub events: Vec<Bytes>,
}

impl EntityPatch {
    pub fn new(fields: FieldMap) -> Self {
        EntityPatch {
            fields,
            events: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: Vec<Bytes>) -> Self {
        self.events = events;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.events.is_empty()
    }
}

/// Per-tick logic over entities this process owns
pub trait EntityLogic {
    /// Compute the patch for one valid owned entity; `dt` is seconds since
    /// the previous tick
    fn tick(&mut self, key: &str, fields: &FieldMap, dt: f64) -> Option<EntityPatch>;
}

impl<F> EntityLogic for F
where
    F: FnMut(&str, &FieldMap, f64) -> Option<EntityPatch>,
{
    fn tick(&mut self, key: &str, fields: &FieldMap, dt: f64) -> Option<EntityPatch> {
        self(key, fields, dt)
    }
}
