#[macro_export]
macro_rules! define_mask {
    ($end:expr, $beg:expr) => {
        ((1 << $end) - (1 << $beg) + (1 << $end))
    };
}

#[macro_export]
macro_rules! define_bitfield {
    ($field:ident, [$($end:tt-$beg:tt)|*]) => {
        #[allow(non_upper_case_globals)]
        pub const $field: u64 = $( $crate::define_mask!($end, $beg) )|*;
    };
}

/// Declares a 64-bit value type whose named fields are masks.
///
/// `define_bits!(S2TTE, NS[55 - 55], DESC_TYPE[1 - 0])` produces a
/// `S2TTE(u64)` wrapper with `S2TTE::NS` and `S2TTE::DESC_TYPE` masks and
/// accessors working on those masks.
#[macro_export]
macro_rules! define_bits {
    ($name:ident, $($field:ident $bits:tt),*) => {
        #[allow(non_snake_case, non_camel_case_types)]
        #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            #[inline(always)]
            pub const fn new(data: u64) -> $name {
                $name(data)
            }

            #[inline(always)]
            pub const fn get(&self) -> u64 {
                self.0
            }

            #[inline(always)]
            pub const fn get_masked(&self, mask: u64) -> u64 {
                self.0 & mask
            }

            #[inline(always)]
            pub const fn get_masked_value(&self, mask: u64) -> u64 {
                (self.0 & mask) >> (mask.trailing_zeros())
            }

            #[inline(always)]
            pub fn set(&mut self, val: u64) -> &mut Self {
                self.0 = val;
                self
            }

            #[inline(always)]
            pub fn set_masked(&mut self, mask: u64, val: u64) -> &mut Self {
                self.0 = (self.0 & !mask) | (val & mask);
                self
            }

            #[inline(always)]
            pub fn set_masked_value(&mut self, mask: u64, val: u64) -> &mut Self {
                self.0 = (self.0 & !mask) | ((val << (mask.trailing_zeros())) & mask);
                self
            }

            #[inline(always)]
            pub fn set_bits(&mut self, mask: u64) -> &mut Self {
                self.0 |= mask;
                self
            }

            #[inline(always)]
            pub fn clear_bits(&mut self, mask: u64) -> &mut Self {
                self.0 &= !mask;
                self
            }

            $( $crate::define_bitfield!($field, $bits); )*
        }

        impl From<u64> for $name {
            fn from(val: u64) -> Self {
                $name(val)
            }
        }

        impl From<$name> for u64 {
            fn from(val: $name) -> u64 {
                val.0
            }
        }
    };
}
