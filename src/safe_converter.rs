/// For widening casts that cannot lose information on any supported platform
pub trait SafeCast<T> {
    fn safe_cast(self) -> T;
}

impl SafeCast<i64> for i32 {
    fn safe_cast(self) -> i64 {
        self as i64
    }
}

impl SafeCast<i64> for u32 {
    fn safe_cast(self) -> i64 {
        self as i64
    }
}


/// For narrowing casts where business logic ensures that the value is in the narrower type's range.
/// NB: The implementations will panic otherwise
pub trait PrecheckedCast<T> {
    fn prechecked_cast(self) -> T;
}
impl PrecheckedCast<u8> for usize {
    fn prechecked_cast(self) -> u8 {
        self.try_into().expect("this is a bug: application logic should have ensured the value range")
    }
}
impl PrecheckedCast<i32> for usize {
    fn prechecked_cast(self) -> i32 {
        self.try_into().expect("this is a bug: application logic should have ensured the value range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prechecked_cast_in_range() {
        let count: u8 = 127usize.prechecked_cast();
        assert_eq!(count, 127);
        let len: i32 = 65536usize.prechecked_cast();
        assert_eq!(len, 65536);
    }

    #[test]
    #[should_panic]
    fn test_prechecked_cast_out_of_range() {
        let _: u8 = 256usize.prechecked_cast();
    }

    #[test]
    fn test_safe_cast() {
        let offset: i64 = u32::MAX.safe_cast();
        assert_eq!(offset, 4294967295);
        let diff: i64 = (-32768i32).safe_cast();
        assert_eq!(diff, -32768);
    }
}
