use crate::safe_converter::SafeCast;
use std::fmt::{Debug, Display, Formatter};

/// A point on the ring of 2^16 sequence ids. Data ids and transmission ids both live in this
///  space, each with its own counter.
///
/// NB: `SeqId` deliberately does not implement `Ord` - circular comparison is not transitive
///      across the whole ring, so it must not be used as a `BTreeMap` key directly. Stores project
///      ids onto a linear line through [SeqLine] instead.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct SeqId(i16);

impl Display for SeqId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for SeqId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl SeqId {
    pub const ZERO: SeqId = SeqId(0);

    pub const RING_SIZE: i32 = 1 << 16;
    pub const HALF_RING: i32 = 1 << 15;

    pub const fn from_raw(value: i16) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> i16 {
        self.0
    }

    pub fn next(&self) -> SeqId {
        SeqId(self.0.wrapping_add(1))
    }

    pub fn prev(&self) -> SeqId {
        SeqId(self.0.wrapping_sub(1))
    }

    pub fn wrapping_add(&self, offs: i32) -> SeqId {
        // truncation to 16 bits is the wrap-around
        SeqId((self.0 as i32).wrapping_add(offs) as i16)
    }

    pub fn wrapping_sub(&self, offs: i32) -> SeqId {
        SeqId((self.0 as i32).wrapping_sub(offs) as i16)
    }

    /// Signed distance from `other` to `self` along the shorter arc of the ring: positive if
    ///  `self` is newer than `other`, negative if it is older.
    ///
    /// NB: If the two ids are exactly half a ring apart, the sign of the raw difference decides.
    ///      Peers must agree bit for bit on this, so the convention must not change.
    pub fn compare(&self, other: SeqId) -> i32 {
        let raw = self.0 as i32 - other.0 as i32;
        if raw > Self::HALF_RING {
            raw - Self::RING_SIZE
        }
        else if raw < -Self::HALF_RING {
            raw + Self::RING_SIZE
        }
        else {
            raw
        }
    }

    pub fn is_newer_than(&self, other: SeqId) -> bool {
        self.compare(other) > 0
    }

    pub fn is_older_than(&self, other: SeqId) -> bool {
        self.compare(other) < 0
    }
}

/// Projects ring ids onto a linear `i64` line, anchored at the newest id seen so far. Within half
///  a ring of the anchor, the projection preserves circular order, so the linear values can be
///  used as keys for ordered collections.
#[derive(Default, Debug, Clone)]
pub struct SeqLine {
    anchor: Option<(SeqId, i64)>,
}

impl SeqLine {
    /// returns the linear position of an id, moving the anchor forward if the id is newer than
    ///  anything seen before
    pub fn project(&mut self, id: SeqId) -> i64 {
        let linear = self.peek(id);
        match self.anchor {
            Some((_, anchor_linear)) if linear <= anchor_linear => {}
            _ => self.anchor = Some((id, linear)),
        }
        linear
    }

    /// returns the linear position an id has or would have, without moving the anchor
    pub fn peek(&self, id: SeqId) -> i64 {
        match self.anchor {
            None => id.to_raw() as i64,
            Some((anchor_id, anchor_linear)) => {
                let diff: i64 = id.compare(anchor_id).safe_cast();
                anchor_linear + diff
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::equal(5, 5, 0)]
    #[case::one_newer(6, 5, 1)]
    #[case::one_older(5, 6, -1)]
    #[case::wrap_max_to_min(i16::MIN, i16::MAX, 1)]
    #[case::wrap_min_to_max(i16::MAX, i16::MIN, -1)]
    #[case::wrap_around_zero(2, -3, 5)]
    #[case::wrap_across_ends(-32760, 32760, 16)]
    #[case::almost_half(32767, 0, 32767)]
    #[case::almost_half_neg(0, 32767, -32767)]
    #[case::half_positive_raw(0, i16::MIN, 32768)]
    #[case::half_negative_raw(i16::MIN, 0, -32768)]
    #[case::half_positive_raw_2(100, -32668, 32768)]
    #[case::half_negative_raw_2(-32668, 100, -32768)]
    fn test_compare(#[case] a: i16, #[case] b: i16, #[case] expected: i32) {
        assert_eq!(SeqId::from_raw(a).compare(SeqId::from_raw(b)), expected);
    }

    #[test]
    fn test_compare_reflexive_and_antisymmetric() {
        for a in (i16::MIN..=i16::MAX).step_by(257) {
            let a = SeqId::from_raw(a);
            assert_eq!(a.compare(a), 0);

            for b in (i16::MIN..=i16::MAX).step_by(997) {
                let b = SeqId::from_raw(b);
                assert_eq!(a.compare(b), -b.compare(a), "{:?} vs {:?}", a, b);
                assert!(a.compare(b).abs() <= SeqId::HALF_RING);
            }
        }
    }

    #[rstest]
    #[case::simple(5, 1, 6)]
    #[case::negative(5, -7, -2)]
    #[case::wrap_up(i16::MAX, 1, i16::MIN)]
    #[case::wrap_down(i16::MIN, -1, i16::MAX)]
    #[case::full_ring(17, 65536, 17)]
    fn test_wrapping_add(#[case] id: i16, #[case] offs: i32, #[case] expected: i16) {
        assert_eq!(SeqId::from_raw(id).wrapping_add(offs), SeqId::from_raw(expected));
        assert_eq!(SeqId::from_raw(expected).wrapping_sub(offs), SeqId::from_raw(id));
    }

    #[test]
    fn test_next_prev() {
        assert_eq!(SeqId::from_raw(i16::MAX).next(), SeqId::from_raw(i16::MIN));
        assert_eq!(SeqId::from_raw(i16::MIN).prev(), SeqId::from_raw(i16::MAX));
        assert!(SeqId::from_raw(i16::MIN).is_newer_than(SeqId::from_raw(i16::MAX)));
        assert!(SeqId::from_raw(i16::MAX).is_older_than(SeqId::from_raw(i16::MIN)));
    }

    #[test]
    fn test_line_preserves_order_across_wrap() {
        let mut line = SeqLine::default();

        let mut id = SeqId::from_raw(i16::MAX - 3);
        let mut prev = line.project(id);
        for _ in 0..10 {
            id = id.next();
            let linear = line.project(id);
            assert_eq!(linear, prev + 1);
            prev = linear;
        }

        // older ids project below the anchor without moving it
        assert_eq!(line.project(SeqId::from_raw(i16::MAX)), prev - 7);
        assert_eq!(line.peek(id), prev);
    }

    #[test]
    fn test_line_peek_does_not_move_anchor() {
        let mut line = SeqLine::default();
        line.project(SeqId::from_raw(10));

        assert_eq!(line.peek(SeqId::from_raw(20)), 20);
        assert_eq!(line.peek(SeqId::from_raw(5)), 5);
        assert_eq!(line.project(SeqId::from_raw(5)), 5);
        assert_eq!(line.peek(SeqId::from_raw(11)), 11);
    }
}
