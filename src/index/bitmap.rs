//! Versioned bitmap

use std::borrow::Cow;

use roaring::RoaringBitmap;

use crate::transactional::{
    TransactionalLayerCreator, TransactionalLayerMaintainer, TransactionalLayerProducer,
    TransactionalResult,
};
use crate::version::{next_version_id, VersionOverflowError};

/// Pending insertions and removals against a committed bitmap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BitmapChanges {
    insertions: RoaringBitmap,
    removals: RoaringBitmap,
}

impl BitmapChanges {
    fn add(&mut self, base: &RoaringBitmap, value: u32) {
        if base.contains(value) {
            self.removals.remove(value);
        } else {
            self.insertions.insert(value);
        }
    }

    fn remove(&mut self, base: &RoaringBitmap, value: u32) {
        if base.contains(value) {
            self.removals.insert(value);
        } else {
            self.insertions.remove(value);
        }
    }

    fn contains(&self, base: &RoaringBitmap, value: u32) -> bool {
        self.insertions.contains(value) || (base.contains(value) && !self.removals.contains(value))
    }

    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.removals.is_empty()
    }

    pub fn insertions(&self) -> &RoaringBitmap {
        &self.insertions
    }

    pub fn removals(&self) -> &RoaringBitmap {
        &self.removals
    }

    fn apply_to(&self, base: &RoaringBitmap) -> RoaringBitmap {
        (base - &self.removals) | &self.insertions
    }
}

/// Bitmap with a version id that changes whenever a commit changes its content.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionalBitmap {
    id: u64,
    bitmap: RoaringBitmap,
}

impl TransactionalBitmap {
    pub fn new(bitmap: RoaringBitmap) -> Result<Self, VersionOverflowError> {
        Ok(Self {
            id: next_version_id()?,
            bitmap,
        })
    }

    pub fn empty() -> Result<Self, VersionOverflowError> {
        Self::new(RoaringBitmap::new())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Committed content.
    pub fn bitmap(&self) -> &RoaringBitmap {
        &self.bitmap
    }

    /// Content as seen by `tx`, or the committed content without one.
    pub fn current(&self, tx: Option<&TransactionalLayerMaintainer>) -> Cow<'_, RoaringBitmap> {
        match tx.and_then(|tx| tx.get_transactional_memory_layer_if_exists(self)) {
            Some(changes) => Cow::Owned(changes.apply_to(&self.bitmap)),
            None => Cow::Borrowed(&self.bitmap),
        }
    }

    pub fn contains(&self, tx: Option<&TransactionalLayerMaintainer>, value: u32) -> bool {
        match tx.and_then(|tx| tx.get_transactional_memory_layer_if_exists(self)) {
            Some(changes) => changes.contains(&self.bitmap, value),
            None => self.bitmap.contains(value),
        }
    }

    /// Returns true when the value was not present before.
    pub fn add(&self, tx: &mut TransactionalLayerMaintainer, value: u32) -> TransactionalResult<bool> {
        let changes = tx.get_or_create_transactional_memory_layer(self)?;
        let added = !changes.contains(&self.bitmap, value);
        changes.add(&self.bitmap, value);
        Ok(added)
    }

    /// Returns true when the value was present before.
    pub fn remove(&self, tx: &mut TransactionalLayerMaintainer, value: u32) -> TransactionalResult<bool> {
        let changes = tx.get_or_create_transactional_memory_layer(self)?;
        let removed = changes.contains(&self.bitmap, value);
        changes.remove(&self.bitmap, value);
        Ok(removed)
    }
}

impl TransactionalLayerCreator for TransactionalBitmap {
    type Layer = BitmapChanges;

    fn id(&self) -> u64 {
        self.id
    }

    fn create_layer(&self) -> BitmapChanges {
        BitmapChanges::default()
    }
}

impl TransactionalLayerProducer for TransactionalBitmap {
    type Output = TransactionalBitmap;

    fn create_copy_with_merged_transactional_memory(
        &self,
        layer: Option<&BitmapChanges>,
        _maintainer: &mut TransactionalLayerMaintainer,
    ) -> TransactionalResult<TransactionalBitmap> {
        match layer {
            Some(changes) if !changes.is_empty() => {
                Ok(TransactionalBitmap::new(changes.apply_to(&self.bitmap))?)
            }
            _ => Ok(self.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(values: &[u32]) -> TransactionalBitmap {
        TransactionalBitmap::new(values.iter().copied().collect()).unwrap()
    }

    #[test]
    fn test_changes_are_invisible_without_transaction() {
        let committed = bitmap(&[1, 2]);
        let mut tx = TransactionalLayerMaintainer::new(1);
        assert!(committed.add(&mut tx, 3).unwrap());
        assert!(committed.remove(&mut tx, 1).unwrap());

        assert!(committed.contains(None, 1));
        assert!(!committed.contains(None, 3));
        assert!(committed.contains(Some(&tx), 3));
        assert!(!committed.contains(Some(&tx), 1));
        let current: Vec<u32> = committed.current(Some(&tx)).iter().collect();
        assert_eq!(current, vec![2, 3]);
    }

    #[test]
    fn test_add_then_remove_cancels_out() {
        let committed = bitmap(&[1]);
        let mut tx = TransactionalLayerMaintainer::new(1);
        committed.add(&mut tx, 5).unwrap();
        committed.remove(&mut tx, 5).unwrap();
        committed.remove(&mut tx, 1).unwrap();
        committed.add(&mut tx, 1).unwrap();
        let changes = tx.get_transactional_memory_layer_if_exists(&committed).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_add_reports_presence() {
        let committed = bitmap(&[1]);
        let mut tx = TransactionalLayerMaintainer::new(1);
        assert!(!committed.add(&mut tx, 1).unwrap());
        assert!(!committed.remove(&mut tx, 9).unwrap());
    }

    #[test]
    fn test_commit_produces_new_version() {
        let committed = bitmap(&[1, 2]);
        let mut tx = TransactionalLayerMaintainer::new(1);
        committed.add(&mut tx, 7).unwrap();
        let next = tx.commit(&committed).unwrap();
        assert_ne!(next.id(), committed.id());
        let values: Vec<u32> = next.bitmap().iter().collect();
        assert_eq!(values, vec![1, 2, 7]);
        assert_eq!(committed.bitmap().len(), 2);
    }

    #[test]
    fn test_unchanged_commit_keeps_version() {
        let committed = bitmap(&[1]);
        let mut tx = TransactionalLayerMaintainer::new(1);
        let next = tx.commit(&committed).unwrap();
        assert_eq!(next, committed);
    }
}
