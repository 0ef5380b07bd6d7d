use super::Blittable;

/// Native encoding of an optional primitive: a presence byte followed by the
/// value. An absent value carries the default (zero) payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OptionalRaw<T> {
    pub has_value: u8,
    pub value: T,
}

unsafe impl<T: Blittable> Blittable for OptionalRaw<T> {}

impl<T: Copy + Default> OptionalRaw<T> {
    pub fn some(value: T) -> Self {
        Self {
            has_value: 1,
            value,
        }
    }

    pub fn none() -> Self {
        Self {
            has_value: 0,
            value: T::default(),
        }
    }

    pub fn is_some(&self) -> bool {
        self.has_value != 0
    }

    pub fn get(self) -> Option<T> {
        self.is_some().then_some(self.value)
    }
}

impl<T: Copy + Default> From<Option<T>> for OptionalRaw<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::some(v),
            None => Self::none(),
        }
    }
}

impl<T: Copy + Default> From<OptionalRaw<T>> for Option<T> {
    fn from(raw: OptionalRaw<T>) -> Self {
        raw.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_layout_matches_native_pair() {
        assert_eq!(size_of::<OptionalRaw<u8>>(), 2);
        assert_eq!(size_of::<OptionalRaw<i32>>(), 8);
        assert_eq!(offset_of!(OptionalRaw<i32>, value), 4);
        assert_eq!(size_of::<OptionalRaw<u64>>(), 16);
        assert_eq!(offset_of!(OptionalRaw<f64>, value), 8);
    }

    #[test]
    fn test_present_value_round_trip() {
        let raw = OptionalRaw::some(-17i32);
        let decoded: Option<i32> = raw.into();
        assert_eq!(decoded, Some(-17));
        assert_eq!(OptionalRaw::from(decoded), raw);

        let raw = OptionalRaw::some(0u64);
        assert_eq!(OptionalRaw::from(Option::<u64>::from(raw)), raw);
        assert!(raw.is_some());
    }

    #[test]
    fn test_absent_value_round_trip_keeps_zero_payload() {
        let raw = OptionalRaw::<f64>::none();
        let decoded: Option<f64> = raw.into();
        assert_eq!(decoded, None);

        let encoded = OptionalRaw::from(decoded);
        assert_eq!(encoded, raw);
        assert_eq!(encoded.has_value, 0);
        assert_eq!(encoded.value.to_bits(), 0);
    }

    #[test]
    fn test_any_nonzero_presence_byte_is_present() {
        let raw = OptionalRaw {
            has_value: 0xff,
            value: 9u16,
        };
        assert_eq!(raw.get(), Some(9));
    }
}
