//! Bitfield map for tracking decoded code bytes.
//!
//! The decoder marks every byte of every decoded instruction and case table. A jump that
//! lands on a marked byte which is not the start of an instruction reveals overlapping
//! decodes, which the decoder reports as malformed bytecode.

/// Tracks which bytes of the code segment have already been decoded.
pub struct VisitedMap {
    data: Vec<usize>,
    elements: usize,
    bitfield_size: usize,
}

impl VisitedMap {
    /// Create a new instance of the `VisitedMap`
    ///
    /// ## Arguments
    /// * 'elements' - The amount of bytes to track
    pub fn new(elements: usize) -> VisitedMap {
        let bitfield_size = std::mem::size_of::<usize>() * 8;

        VisitedMap {
            data: vec![0_usize; elements.div_ceil(bitfield_size)],
            elements,
            bitfield_size,
        }
    }

    /// Check if a certain byte has already been visited
    pub fn get(&self, element: usize) -> bool {
        if element >= self.elements {
            return false;
        }

        let bitfield = self.data[element / self.bitfield_size];
        let shift_amount = u32::try_from(element % self.bitfield_size).unwrap_or(0);
        (bitfield.wrapping_shr(shift_amount) & 1_usize) != 0
    }

    /// Returns `true` if any byte of `[start, start + len)` has been visited
    pub fn any_in_range(&self, start: usize, len: usize) -> bool {
        (start..start.saturating_add(len)).any(|element| self.get(element))
    }

    /// Mark a single byte as visited
    pub fn set(&mut self, element: usize, visited: bool) {
        if element >= self.elements {
            return;
        }

        let shift_amount = u32::try_from(element % self.bitfield_size).unwrap_or(0);
        let mask = 1_usize.wrapping_shl(shift_amount);
        let bitfield = &mut self.data[element / self.bitfield_size];
        if visited {
            *bitfield |= mask;
        } else {
            *bitfield &= !mask;
        }
    }

    /// Mark `len` bytes starting at `start` as visited
    pub fn set_range(&mut self, start: usize, len: usize) {
        for element in start..start.saturating_add(len).min(self.elements) {
            self.set(element, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut map = VisitedMap::new(130);
        assert!(!map.get(5));
        assert!(!map.get(130));

        map.set(5, true);
        assert!(map.get(5));
        map.set(5, false);
        assert!(!map.get(5));

        map.set(500, true);
        assert!(!map.get(500));
    }

    #[test]
    fn test_ranges_across_words() {
        let mut map = VisitedMap::new(200);
        map.set_range(60, 10);
        assert!(map.get(60));
        assert!(map.get(69));
        assert!(!map.get(70));
        assert!(map.any_in_range(50, 11));
        assert!(!map.any_in_range(0, 60));
        assert!(!map.any_in_range(70, 130));
    }

    #[test]
    fn test_empty() {
        let mut map = VisitedMap::new(0);
        map.set_range(0, 4);
        assert!(!map.get(0));
        assert!(!map.any_in_range(0, 4));
    }
}
