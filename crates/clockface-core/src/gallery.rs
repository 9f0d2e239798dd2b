//! In-memory gallery of enrolled descriptor templates.
//!
//! The gallery is the matcher's only view of enrollment data. It is
//! loaded once from the store at startup and mutated only through
//! [`Gallery::add_or_replace_slot`], which the session serializes with
//! identification scans.

use thiserror::Error;

use crate::types::{Embedding, Enrollee, SlotName};

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("descriptor dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Enrolled templates, one slot set per enrollee, in enrollment order.
#[derive(Debug, Clone)]
pub struct Gallery {
    dim: usize,
    entries: Vec<Enrollee>,
}

impl Gallery {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: Vec::new(),
        }
    }

    /// Build from store rows. Entries keep their given order; vectors whose
    /// dimension disagrees with `dim` stay stored but are skipped by
    /// [`iter_vectors`](Self::iter_vectors).
    pub fn with_enrollees(dim: usize, entries: Vec<Enrollee>) -> Self {
        for enrollee in &entries {
            for (slot, stored) in enrollee.slots.iter() {
                if let Some(vector) = &stored.embedding {
                    if vector.len() != dim {
                        tracing::warn!(
                            enrollee = %enrollee.id,
                            slot = %slot,
                            expected = dim,
                            actual = vector.len(),
                            "stored descriptor has stale dimension, ignoring"
                        );
                    }
                }
            }
        }
        Self { dim, entries }
    }

    pub fn descriptor_dim(&self) -> usize {
        self.dim
    }

    /// Number of enrollees.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enrollees(&self) -> &[Enrollee] {
        &self.entries
    }

    pub fn find(&self, enrollee_id: &str) -> Option<&Enrollee> {
        self.entries.iter().find(|e| e.id == enrollee_id)
    }

    /// Number of dimension-valid vectors across all slots.
    pub fn vector_count(&self) -> usize {
        self.iter_vectors().count()
    }

    /// Insert or overwrite a single slot for an enrollee, creating the
    /// enrollee when unknown. Other slots are untouched. A slot stored
    /// with neither vector nor image is cleared.
    pub fn add_or_replace_slot(
        &mut self,
        enrollee_id: &str,
        display_name: &str,
        slot: SlotName,
        embedding: Option<Embedding>,
        reference_image: Option<Vec<u8>>,
    ) -> Result<(), GalleryError> {
        if let Some(vector) = &embedding {
            if vector.len() != self.dim {
                return Err(GalleryError::DimensionMismatch {
                    expected: self.dim,
                    actual: vector.len(),
                });
            }
        }
        let entry = match self.entries.iter_mut().find(|e| e.id == enrollee_id) {
            Some(entry) => entry,
            None => {
                self.entries.push(Enrollee::new(enrollee_id, display_name));
                self.entries.last_mut().unwrap()
            }
        };
        if !display_name.is_empty() {
            entry.display_name = display_name.to_string();
        }
        let target = entry.slots.get_mut(slot);
        target.embedding = embedding;
        target.reference_image = reference_image;
        Ok(())
    }

    /// Lazy scan of every dimension-valid stored vector.
    ///
    /// Yields per enrollee, angled slots first and `legacy` last, so a
    /// streaming consumer can apply the legacy precedence cut at the
    /// point the legacy vector appears.
    pub fn iter_vectors(&self) -> impl Iterator<Item = (&str, SlotName, &Embedding)> + '_ {
        let dim = self.dim;
        self.entries.iter().flat_map(move |enrollee| {
            SlotName::ANGLED
                .iter()
                .copied()
                .chain(std::iter::once(SlotName::Legacy))
                .filter_map(move |slot| {
                    enrollee
                        .slots
                        .get(slot)
                        .embedding
                        .as_ref()
                        .filter(|v| v.len() == dim)
                        .map(|v| (enrollee.id.as_str(), slot, v))
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec3(x: f32) -> Embedding {
        Embedding::new(vec![x, 0.0, 0.0])
    }

    #[test]
    fn test_add_creates_enrollee_in_order() {
        let mut gallery = Gallery::new(3);
        gallery
            .add_or_replace_slot("b", "Bea", SlotName::Front, Some(vec3(1.0)), None)
            .unwrap();
        gallery
            .add_or_replace_slot("a", "Al", SlotName::Front, Some(vec3(2.0)), None)
            .unwrap();
        let ids: Vec<_> = gallery.enrollees().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(gallery.len(), 2);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut gallery = Gallery::new(3);
        let err = gallery
            .add_or_replace_slot("a", "Al", SlotName::Front, Some(Embedding::new(vec![1.0])), None)
            .unwrap_err();
        match err {
            GalleryError::DimensionMismatch { expected, actual } => {
                assert_eq!((expected, actual), (3, 1));
            }
        }
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_replace_slot_keeps_others() {
        let mut gallery = Gallery::new(3);
        gallery
            .add_or_replace_slot("a", "Al", SlotName::Front, Some(vec3(1.0)), None)
            .unwrap();
        gallery
            .add_or_replace_slot("a", "Al", SlotName::Left, Some(vec3(2.0)), None)
            .unwrap();
        gallery
            .add_or_replace_slot("a", "Al", SlotName::Front, Some(vec3(9.0)), None)
            .unwrap();

        let entry = gallery.find("a").unwrap();
        assert_eq!(entry.slots.front.embedding, Some(vec3(9.0)));
        assert_eq!(entry.slots.left.embedding, Some(vec3(2.0)));
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn test_iter_vectors_orders_legacy_last_per_enrollee() {
        let mut gallery = Gallery::new(3);
        gallery
            .add_or_replace_slot("a", "Al", SlotName::Legacy, Some(vec3(1.0)), None)
            .unwrap();
        gallery
            .add_or_replace_slot("a", "Al", SlotName::Tilt, Some(vec3(2.0)), None)
            .unwrap();
        gallery
            .add_or_replace_slot("a", "Al", SlotName::Front, Some(vec3(3.0)), None)
            .unwrap();
        gallery
            .add_or_replace_slot("b", "Bea", SlotName::Legacy, Some(vec3(4.0)), None)
            .unwrap();

        let order: Vec<_> = gallery
            .iter_vectors()
            .map(|(id, slot, _)| (id.to_string(), slot))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a".to_string(), SlotName::Front),
                ("a".to_string(), SlotName::Tilt),
                ("a".to_string(), SlotName::Legacy),
                ("b".to_string(), SlotName::Legacy),
            ]
        );
    }

    #[test]
    fn test_iter_vectors_skips_stale_dimensions() {
        let mut enrollee = Enrollee::new("a", "Al");
        enrollee.slots.front.embedding = Some(Embedding::new(vec![1.0, 2.0]));
        enrollee.slots.left.embedding = Some(Embedding::new(vec![1.0, 2.0, 3.0]));
        let gallery = Gallery::with_enrollees(3, vec![enrollee]);

        let slots: Vec<_> = gallery.iter_vectors().map(|(_, slot, _)| slot).collect();
        assert_eq!(slots, vec![SlotName::Left]);
        // The enrollee itself is still present.
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.vector_count(), 1);
    }

    #[test]
    fn test_clearing_a_slot() {
        let mut gallery = Gallery::new(3);
        gallery
            .add_or_replace_slot("a", "Al", SlotName::Front, Some(vec3(1.0)), Some(vec![7, 7, 7]))
            .unwrap();
        gallery
            .add_or_replace_slot("a", "Al", SlotName::Front, None, None)
            .unwrap();
        assert!(gallery.find("a").unwrap().slots.front.is_empty());
    }
}
