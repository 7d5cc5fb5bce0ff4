//! Old ↔ new section index association.

use std::collections::HashMap;

use crate::image::SectionIndex;

/// Bidirectional map between the section indices of a source image and
/// those of its clone.
///
/// Built while sections are cloned and consulted read-only afterwards. It
/// stores indices only, never references into either image.
#[derive(Debug, Default, Clone)]
pub struct IndexMap {
    old_to_new: HashMap<SectionIndex, SectionIndex>,
    new_to_old: HashMap<SectionIndex, SectionIndex>,
}

impl IndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `old` was cloned to `new`.
    pub fn insert(&mut self, old: SectionIndex, new: SectionIndex) {
        self.old_to_new.insert(old, new);
        self.new_to_old.insert(new, old);
    }

    pub fn new_for(&self, old: SectionIndex) -> Option<SectionIndex> {
        self.old_to_new.get(&old).copied()
    }

    pub fn old_for(&self, new: SectionIndex) -> Option<SectionIndex> {
        self.new_to_old.get(&new).copied()
    }

    pub fn len(&self) -> usize {
        self.old_to_new.len()
    }

    pub fn is_empty(&self) -> bool {
        self.old_to_new.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_work_in_both_directions() {
        let mut map = IndexMap::new();
        map.insert(SectionIndex(4), SectionIndex(1));
        map.insert(SectionIndex(2), SectionIndex(2));

        assert_eq!(map.new_for(SectionIndex(4)), Some(SectionIndex(1)));
        assert_eq!(map.old_for(SectionIndex(2)), Some(SectionIndex(2)));
        assert_eq!(map.new_for(SectionIndex(3)), None);
        assert_eq!(map.len(), 2);
        assert!(!map.is_empty());
    }
}
