use std::collections::BTreeMap;

use crate::math::Scalar;

/// Surface response parameters of a rigid body.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub restitution: Scalar,
    pub friction: Scalar,
    /// Optional identifier used to look up pairwise overrides in the
    /// `MaterialTable`.
    pub id: Option<u32>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            restitution: 0.0,
            friction: 0.5,
            id: None,
        }
    }
}

/// Blended parameters for a pair of touching surfaces.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactMaterial {
    pub restitution: Scalar,
    pub friction: Scalar,
}

/// Pairwise material overrides. When a pair of material ids has an entry it
/// takes precedence over the default mixing rules.
#[derive(Clone, Debug, Default)]
pub struct MaterialTable {
    pairs: BTreeMap<(u32, u32), ContactMaterial>,
}

impl MaterialTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id_a: u32, id_b: u32, contact: ContactMaterial) {
        self.pairs.insert(Self::key(id_a, id_b), contact);
    }

    pub fn get(&self, id_a: u32, id_b: u32) -> Option<&ContactMaterial> {
        self.pairs.get(&Self::key(id_a, id_b))
    }

    /// Resolve the contact response for two materials: a pairwise override
    /// if both carry ids and the table has the pair, default mixing
    /// otherwise (max restitution, geometric mean friction).
    pub fn mix(&self, a: &Material, b: &Material) -> ContactMaterial {
        if let (Some(id_a), Some(id_b)) = (a.id, b.id) {
            if let Some(contact) = self.get(id_a, id_b) {
                return *contact;
            }
        }
        ContactMaterial {
            restitution: a.restitution.max(b.restitution),
            friction: (a.friction * b.friction).sqrt(),
        }
    }

    fn key(id_a: u32, id_b: u32) -> (u32, u32) {
        if id_a <= id_b {
            (id_a, id_b)
        } else {
            (id_b, id_a)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_override_beats_mixing() {
        let mut table = MaterialTable::new();
        table.insert(
            2,
            1,
            ContactMaterial {
                restitution: 0.9,
                friction: 0.1,
            },
        );

        let a = Material {
            restitution: 0.0,
            friction: 1.0,
            id: Some(1),
        };
        let b = Material {
            restitution: 0.0,
            friction: 1.0,
            id: Some(2),
        };
        let mixed = table.mix(&a, &b);
        assert_eq!(mixed.restitution, 0.9);
        assert_eq!(mixed.friction, 0.1);
    }

    #[test]
    fn default_mixing_uses_max_restitution() {
        let table = MaterialTable::new();
        let a = Material {
            restitution: 1.0,
            friction: 0.0,
            id: None,
        };
        let b = Material::default();
        assert_eq!(table.mix(&a, &b).restitution, 1.0);
    }
}
