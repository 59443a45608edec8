use crate::component::registry::ComponentKind;

/// Per-entity record of the component changes accumulated during a step,
/// split into created, updated and destroyed kind bitmaps. Flushed into the
/// outbound delta and cleared on emission. Never shipped itself.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Dirty {
    pub is_new_entity: bool,
    created: u64,
    updated: u64,
    destroyed: u64,
}

impl Dirty {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_created(&mut self, kind: ComponentKind) {
        self.created |= kind.bit();
    }

    pub fn mark_updated(&mut self, kind: ComponentKind) {
        self.updated |= kind.bit();
    }

    pub fn mark_destroyed(&mut self, kind: ComponentKind) {
        self.created &= !kind.bit();
        self.updated &= !kind.bit();
        self.destroyed |= kind.bit();
    }

    pub fn created_kinds(&self) -> impl Iterator<Item = ComponentKind> + '_ {
        kinds_of(self.created)
    }

    pub fn updated_kinds(&self) -> impl Iterator<Item = ComponentKind> + '_ {
        kinds_of(self.updated)
    }

    pub fn destroyed_kinds(&self) -> impl Iterator<Item = ComponentKind> + '_ {
        kinds_of(self.destroyed)
    }

    pub fn is_clear(&self) -> bool {
        !self.is_new_entity && self.created == 0 && self.updated == 0 && self.destroyed == 0
    }
}

fn kinds_of(mask: u64) -> impl Iterator<Item = ComponentKind> {
    ComponentKind::ALL
        .iter()
        .copied()
        .filter(move |kind| mask & kind.bit() != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroyed_supersedes_created_and_updated() {
        let mut dirty = Dirty::new();
        dirty.mark_created(ComponentKind::Position);
        dirty.mark_updated(ComponentKind::Position);
        dirty.mark_destroyed(ComponentKind::Position);

        assert_eq!(dirty.created_kinds().count(), 0);
        assert_eq!(dirty.updated_kinds().count(), 0);
        assert_eq!(
            dirty.destroyed_kinds().collect::<Vec<_>>(),
            vec![ComponentKind::Position]
        );
    }
}
