//! Byte order conversions (`htole16`, `le64toh`, `htobe64`, ...).

macro_rules! byte_order {
    ($($to:ident / $from:ident: $ty:ty => $to_fn:ident, $from_fn:ident;)*) => {
        $(
            #[inline(always)]
            pub const fn $to(x: $ty) -> $ty {
                x.$to_fn()
            }

            #[inline(always)]
            pub const fn $from(x: $ty) -> $ty {
                <$ty>::$from_fn(x)
            }
        )*
    };
}

byte_order! {
    host_to_le16 / le_to_host16: u16 => to_le, from_le;
    host_to_le32 / le_to_host32: u32 => to_le, from_le;
    host_to_le64 / le_to_host64: u64 => to_le, from_le;
    host_to_be16 / be_to_host16: u16 => to_be, from_be;
    host_to_be32 / be_to_host32: u32 => to_be, from_be;
    host_to_be64 / be_to_host64: u64 => to_be, from_be;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        assert_eq!(host_to_le32(0x1122_3344).to_ne_bytes(), [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(host_to_be64(1).to_ne_bytes(), [0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(le_to_host16(u16::from_ne_bytes([0x34, 0x12])), 0x1234);
        assert_eq!(be_to_host16(u16::from_ne_bytes([0x12, 0x34])), 0x1234);
    }

    #[test]
    fn test_round_trip() {
        let mut x: u64 = 0x0123_4567_89AB_CDEF;
        for _ in 0..64 {
            assert_eq!(le_to_host64(host_to_le64(x)), x);
            assert_eq!(be_to_host64(host_to_be64(x)), x);
            assert_eq!(le_to_host32(host_to_le32(x as u32)), x as u32);
            assert_eq!(be_to_host32(host_to_be32(x as u32)), x as u32);
            assert_eq!(le_to_host16(host_to_le16(x as u16)), x as u16);
            x = x.rotate_left(7) ^ 0x9E37_79B9;
        }
        assert_eq!(le_to_host64(host_to_le64(u64::MAX)), u64::MAX);
    }
}
