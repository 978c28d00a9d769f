//! Fixed-size bit set over bone indices

use studioanim_sdk::MAX_STUDIO_BONES;

const _: () = assert!(MAX_STUDIO_BONES <= 128);

/// One bit per bone, used to record which bones a pass touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BoneBitList(u128);

impl BoneBitList {
    pub const fn new() -> Self {
        Self(0)
    }

    #[inline]
    pub fn mark(&mut self, bone: usize) {
        if bone < MAX_STUDIO_BONES {
            self.0 |= 1u128 << bone;
        }
    }

    #[inline]
    pub fn clear_bone(&mut self, bone: usize) {
        if bone < MAX_STUDIO_BONES {
            self.0 &= !(1u128 << bone);
        }
    }

    #[inline]
    pub fn is_marked(&self, bone: usize) -> bool {
        bone < MAX_STUDIO_BONES && self.0 & (1u128 << bone) != 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Marked bone indices in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let bits = self.0;
        (0..MAX_STUDIO_BONES).filter(move |&bone| bits & (1u128 << bone) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_iterate() {
        let mut list = BoneBitList::new();
        list.mark(0);
        list.mark(5);
        list.mark(127);
        list.mark(500);

        assert!(list.is_marked(5));
        assert!(!list.is_marked(4));
        assert_eq!(list.count(), 3);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![0, 5, 127]);

        list.clear_bone(5);
        assert!(!list.is_marked(5));
        list.clear();
        assert!(list.is_empty());
    }
}
