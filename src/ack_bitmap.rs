use crate::ack_header::AckHeader;
use crate::seq_id::SeqId;
use tracing::trace;

/// Width of the 'preceding acks' bitmap, both in the register and on the wire. Both peers must
///  use the same width.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AckBitmapWidth {
    Bits32,
    Bits64,
}

impl AckBitmapWidth {
    pub fn bits(&self) -> u32 {
        match self {
            AckBitmapWidth::Bits32 => 32,
            AckBitmapWidth::Bits64 => 64,
        }
    }

    pub fn serialized_len(&self) -> usize {
        match self {
            AckBitmapWidth::Bits32 => size_of::<u32>(),
            AckBitmapWidth::Bits64 => size_of::<u64>(),
        }
    }

    fn mask(&self) -> u64 {
        match self {
            AckBitmapWidth::Bits32 => u32::MAX as u64,
            AckBitmapWidth::Bits64 => u64::MAX,
        }
    }
}

/// A fixed-width window of 'seen' flags anchored at a reference id (the newest id seen so far).
///
/// Bit `i` means that `reference - (i+1)` was seen. When a newer id arrives, the window is
///  re-anchored at that id, shifting older flags towards the high end; flags that are pushed
///  beyond the register width are lost.
///
/// NB: The initial reference is a placeholder that was never actually seen, so it does not turn
///      into a flag when the window is first re-anchored.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AckBitmap {
    width: AckBitmapWidth,
    reference: SeqId,
    reference_seen: bool,
    bits: u64,
}

impl AckBitmap {
    pub fn new(width: AckBitmapWidth, initial_reference: SeqId) -> AckBitmap {
        AckBitmap {
            width,
            reference: initial_reference,
            reference_seen: false,
            bits: 0,
        }
    }

    pub fn reference(&self) -> SeqId {
        self.reference
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn to_header(&self) -> AckHeader {
        AckHeader {
            cumulative_ack: self.reference,
            preceding_acks: self.bits,
        }
    }

    pub fn record_seen(&mut self, seen_ids: impl IntoIterator<Item = SeqId>) {
        for seen in seen_ids {
            let diff = self.reference.compare(seen);

            if diff > 0 {
                if diff as u32 <= self.width.bits() {
                    self.bits |= 1u64 << (diff - 1);
                }
                else {
                    trace!("seen id {:?} is too far behind reference {:?} - not recorded", seen, self.reference);
                }
            }
            else if diff < 0 {
                // re-anchor: the old reference becomes bit |diff|-1
                let distance = diff.unsigned_abs();
                self.shift_left(1);
                if self.reference_seen {
                    self.bits |= 1;
                }
                self.shift_left(distance - 1);
                self.reference = seen;
            }
            self.reference_seen = true;
        }
    }

    pub fn is_seen(&self, id: SeqId) -> bool {
        let diff = self.reference.compare(id);
        if diff == 0 {
            return self.reference_seen;
        }
        if diff < 0 || diff as u32 > self.width.bits() {
            return false;
        }
        self.bits & (1u64 << (diff - 1)) != 0
    }

    fn shift_left(&mut self, n: u32) {
        self.bits = if n >= u64::BITS {
            0
        }
        else {
            self.bits << n
        };
        self.bits &= self.width.mask();
    }
}
