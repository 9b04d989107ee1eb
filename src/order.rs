//! Element reordering derived from clustering results.

use crate::cluster::LeafOrdered;
use crate::error::{Error, Result};

/// A permutation of element indices: `order[p]` is the original index of
/// the element placed at new position `p`. Always a bijection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    order: Vec<usize>,
}

impl Permutation {
    /// The identity permutation over `n` elements (axis not clustered).
    pub fn identity(n: usize) -> Self {
        Self {
            order: (0..n).collect(),
        }
    }

    /// Build from an explicit order, validating bijectivity.
    pub fn from_order(order: Vec<usize>) -> Result<Self> {
        let mut seen = vec![false; order.len()];
        for &idx in &order {
            if idx >= order.len() || seen[idx] {
                return Err(Error::InvalidParameter {
                    name: "order",
                    message: "not a bijection over the element indices",
                });
            }
            seen[idx] = true;
        }
        Ok(Self { order })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the permutation covers zero elements.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether this is the identity.
    pub fn is_identity(&self) -> bool {
        self.order.iter().enumerate().all(|(p, &i)| p == i)
    }

    /// The order as a slice: new position → original index.
    pub fn as_slice(&self) -> &[usize] {
        &self.order
    }

    /// Apply to a slice of items, cloning them into the new order.
    pub fn apply<T: Clone>(&self, items: &[T]) -> Vec<T> {
        debug_assert_eq!(items.len(), self.order.len());
        self.order.iter().map(|&i| items[i].clone()).collect()
    }
}

/// Derive the permutation for one axis from an optional clustering
/// result. `None` (axis not clustered) yields the identity over `n`
/// elements. Pure and total.
pub fn derive_order(result: Option<&dyn LeafOrdered>, n: usize) -> Permutation {
    match result {
        Some(r) => Permutation {
            order: r.leaf_order(),
        },
        None => Permutation::identity(n),
    }
}
