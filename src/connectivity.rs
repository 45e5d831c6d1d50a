//!
//! # Layer Connectivity Relation
//!
//! [Connectivity] records which layers are electrically joined where their
//! shapes touch, and provides the shape-level interaction predicate built on
//! that relation. The relation is symmetric; a self-connected layer joins
//! touching shapes on that same layer.
//!

// Std-Lib
use std::collections::{BTreeMap, BTreeSet};

// Crates.io
use serde::{Deserialize, Serialize};

// Local imports
use crate::{
    geom::{shapes_interact, Shape, Transform, TransformTrait},
    layout::LayerId,
};

/// Shared empty neighbor-set for unregistered layers
static EMPTY_LAYERS: BTreeSet<LayerId> = BTreeSet::new();

/// # Layer Connectivity Relation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connectivity {
    connected: BTreeMap<LayerId, BTreeSet<LayerId>>,
    all_layers: BTreeSet<LayerId>,
}
impl Connectivity {
    /// Create a new, empty relation
    pub fn new() -> Self {
        Self::default()
    }
    /// Record that layers `la` and `lb` connect where they touch.
    /// Both directions are recorded, and both layers registered.
    pub fn connect(&mut self, la: LayerId, lb: LayerId) {
        self.connected.entry(la).or_default().insert(lb);
        self.connected.entry(lb).or_default().insert(la);
        self.all_layers.insert(la);
        self.all_layers.insert(lb);
    }
    /// Record that shapes on layer `l` connect to other shapes on `l`
    pub fn connect_self(&mut self, l: LayerId) {
        self.connected.entry(l).or_default().insert(l);
        self.all_layers.insert(l);
    }
    /// Every registered layer, in increasing order
    pub fn layers(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.all_layers.iter().copied()
    }
    /// The neighbor set of `layer`; empty for unregistered layers
    pub fn connected(&self, layer: LayerId) -> &BTreeSet<LayerId> {
        self.connected.get(&layer).unwrap_or(&EMPTY_LAYERS)
    }
    /// Whether layers `la` and `lb` are related
    pub fn is_connected(&self, la: LayerId, lb: LayerId) -> bool {
        self.connected(la).contains(&lb)
    }
    /// # Shape-Level Interaction Predicate
    ///
    /// Whether shape `a` on layer `la` electrically joins shape `b` on layer
    /// `lb`, with `b` placed by `trans`. Returns false without geometric work
    /// when the layers are unrelated; identity transforms skip the placement.
    pub fn interacts(
        &self,
        a: &Shape,
        la: LayerId,
        b: &Shape,
        lb: LayerId,
        trans: &Transform,
    ) -> bool {
        if !self.is_connected(la, lb) {
            return false;
        }
        if trans.is_identity() {
            shapes_interact(a, b)
        } else {
            shapes_interact(a, &b.transform(trans))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Point, Rect};

    fn rect(x0: crate::Int, y0: crate::Int, x1: crate::Int, y1: crate::Int) -> Shape {
        Shape::Rect(Rect::new(Point::new(x0, y0), Point::new(x1, y1)))
    }

    #[test]
    fn symmetric_relation() {
        let mut conn = Connectivity::new();
        conn.connect(1, 2);
        conn.connect_self(3);
        assert!(conn.is_connected(1, 2));
        assert!(conn.is_connected(2, 1));
        assert!(!conn.is_connected(1, 1));
        assert!(conn.is_connected(3, 3));
        assert_eq!(conn.layers().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(conn.connected(99).is_empty());
    }
    #[test]
    fn interaction_gate() {
        let mut conn = Connectivity::new();
        conn.connect(1, 2);
        let a = rect(0, 0, 10, 10);
        let b = rect(5, 5, 15, 15);
        let ident = Transform::identity();
        assert!(conn.interacts(&a, 1, &b, 2, &ident));
        // Unrelated layers: no geometric work, no interaction
        assert!(!conn.interacts(&a, 1, &b, 3, &ident));
        // Same layer, not self-connected
        assert!(!conn.interacts(&a, 1, &b, 1, &ident));
        // A transform that separates them
        let apart = Transform::translate(100., 0.);
        assert!(!conn.interacts(&a, 1, &b, 2, &apart));
        // And one that brings a far shape into contact
        let far = rect(100, 0, 110, 10);
        let back = Transform::translate(-95., 0.);
        assert!(conn.interacts(&a, 1, &far, 2, &back));
    }
}
