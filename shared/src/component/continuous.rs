use crate::component::registry::ComponentKind;

/// The component kinds a worker must ship back to the coordinator after
/// every step for one entity, regardless of dirtiness. Used for the state
/// the coordinator interpolates or reconciles continuously.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Continuous {
    kinds: [ComponentKind; Self::MAX_SIZE],
    size: usize,
}

impl Continuous {
    pub const MAX_SIZE: usize = 16;

    pub fn new() -> Self {
        Self {
            kinds: [ComponentKind::Position; Self::MAX_SIZE],
            size: 0,
        }
    }

    pub fn insert(&mut self, kind: ComponentKind) {
        if self.contains(kind) {
            return;
        }
        assert!(
            self.size < Self::MAX_SIZE,
            "Continuous set is full, cannot insert {:?}",
            kind
        );
        self.kinds[self.size] = kind;
        self.size += 1;
    }

    pub fn remove(&mut self, kind: ComponentKind) {
        for i in 0..self.size {
            if self.kinds[i] == kind {
                self.size -= 1;
                self.kinds[i] = self.kinds[self.size];
                return;
            }
        }
    }

    pub fn contains(&self, kind: ComponentKind) -> bool {
        self.kinds[..self.size].contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = ComponentKind> + '_ {
        self.kinds[..self.size].iter().copied()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl Default for Continuous {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut continuous = Continuous::new();
        continuous.insert(ComponentKind::Position);
        continuous.insert(ComponentKind::Position);
        assert_eq!(continuous.len(), 1);
    }

    #[test]
    fn remove_swaps_last_in() {
        let mut continuous = Continuous::new();
        continuous.insert(ComponentKind::Position);
        continuous.insert(ComponentKind::Orientation);
        continuous.insert(ComponentKind::LinVel);
        continuous.remove(ComponentKind::Position);
        assert!(!continuous.contains(ComponentKind::Position));
        assert!(continuous.contains(ComponentKind::Orientation));
        assert!(continuous.contains(ComponentKind::LinVel));
        assert_eq!(continuous.len(), 2);
    }
}
