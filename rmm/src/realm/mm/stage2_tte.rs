use crate::asm::dsb_ish;
use crate::granule::{Content, GRANULE_SHIFT};

use armv9a::define_bits;

pub const S2TTE_STRIDE: usize = GRANULE_SHIFT - 3;
pub const S2TTES_PER_S2TT: usize = 1 << S2TTE_STRIDE;

pub const RTT_MIN_BLOCK_LEVEL: usize = 2;
pub const RTT_PAGE_LEVEL: usize = 3;

// Output addresses are limited to 48 bits.
const ADDR_MSB: usize = 47;

pub mod invalid_hipas {
    pub const UNASSIGNED: u64 = 0b0000;
    pub const ASSIGNED: u64 = 0b0001;
    pub const DESTROYED: u64 = 0b0010;
}

pub mod invalid_ripas {
    pub const EMPTY: u64 = 0b0;
    pub const RAM: u64 = 0b1;
}

pub mod desc_type {
    pub const L012_TABLE: u64 = 0x3;
    pub const L012_BLOCK: u64 = 0x1;
    pub const L3_PAGE: u64 = 0x3;
    pub const LX_INVALID: u64 = 0x0;
}

pub mod memattr {
    pub const FWB_NORMAL_WB: u64 = (1 << 4) | (2 << 2);
    pub const FWB_RESERVED: u64 = 1 << 4;
}

pub mod shareable {
    pub const RESERVED: u64 = 1 << 8;
    pub const INNER: u64 = 3 << 8;
}

pub const AP_RW: u64 = 3 << 6;
pub const AF: u64 = 1 << 10;
pub const XN: u64 = 2 << 53;
pub const NS: u64 = 1 << 55;

const ATTRS: u64 = memattr::FWB_NORMAL_WB | AP_RW | shareable::INNER | AF;
const BLOCK: u64 = ATTRS | desc_type::L012_BLOCK;
const PAGE: u64 = ATTRS | desc_type::L3_PAGE;
const NS_ATTRS: u64 = NS | XN | AF;
const BLOCK_NS: u64 = NS_ATTRS | desc_type::L012_BLOCK;
const PAGE_NS: u64 = NS_ATTRS | desc_type::L3_PAGE;

pub const INVALID_UNPROTECTED: u64 = 0x0;

define_bits!(
    S2TTE,
    NS[55 - 55],
    XN[54 - 53],
    AF[10 - 10],
    SH[9 - 8],
    AP[7 - 6],
    INVALID_RIPAS[6 - 6],
    INVALID_HIPAS[5 - 2],
    MEMATTR[4 - 2],
    DESC_TYPE[1 - 0]
);

/// Bits a host may choose for an unprotected mapping, besides the address.
pub const NS_ATTR_HOST_MASK: u64 = S2TTE::MEMATTR | S2TTE::AP | S2TTE::SH;

/// Position of the lowest output address bit for an entry at `level`.
pub const fn level_shift(level: usize) -> usize {
    (RTT_PAGE_LEVEL - level) * S2TTE_STRIDE + GRANULE_SHIFT
}

/// Size of the region one entry at `level` maps.
pub const fn map_size(level: usize) -> usize {
    1 << level_shift(level)
}

/// Keeps bits [47:lsb(level)] of `addr`.
pub const fn addr_level_mask(addr: u64, level: usize) -> u64 {
    let lsb = level_shift(level);
    let mask = ((1u64 << (ADDR_MSB + 1)) - 1) & !((1u64 << lsb) - 1);
    addr & mask
}

pub fn addr_is_level_aligned(addr: usize, level: usize) -> bool {
    addr as u64 == addr_level_mask(addr as u64, level)
}

pub fn host_ns_is_valid(s2tte: u64, level: usize) -> bool {
    let mask = addr_level_mask(!0, level) | NS_ATTR_HOST_MASK;

    if s2tte & !mask != 0 {
        return false;
    }
    if s2tte & S2TTE::MEMATTR == memattr::FWB_RESERVED {
        return false;
    }
    if s2tte & S2TTE::SH == shareable::RESERVED {
        return false;
    }
    true
}

pub fn host_ns_attrs(s2tte: u64, level: usize) -> u64 {
    let mask = addr_level_mask(!0, level) | NS_ATTR_HOST_MASK;
    s2tte & mask
}

impl From<usize> for S2TTE {
    fn from(val: usize) -> Self {
        Self(val as u64)
    }
}

impl S2TTE {
    pub fn unassigned(ripas: u64) -> Self {
        Self(
            (invalid_hipas::UNASSIGNED << S2TTE::INVALID_HIPAS.trailing_zeros())
                | (ripas << S2TTE::INVALID_RIPAS.trailing_zeros()),
        )
    }

    pub fn destroyed() -> Self {
        Self(invalid_hipas::DESTROYED << S2TTE::INVALID_HIPAS.trailing_zeros())
    }

    /// `pa` must be aligned to `level`.
    pub fn assigned_empty(pa: usize, level: usize) -> Self {
        debug_assert!(addr_is_level_aligned(pa, level));
        Self(
            pa as u64
                | (invalid_hipas::ASSIGNED << S2TTE::INVALID_HIPAS.trailing_zeros())
                | (invalid_ripas::EMPTY << S2TTE::INVALID_RIPAS.trailing_zeros()),
        )
    }

    pub fn valid(pa: usize, level: usize) -> Self {
        debug_assert!(level >= RTT_MIN_BLOCK_LEVEL && addr_is_level_aligned(pa, level));
        match level {
            RTT_PAGE_LEVEL => Self(pa as u64 | PAGE),
            _ => Self(pa as u64 | BLOCK),
        }
    }

    pub fn invalid_unprotected() -> Self {
        Self(INVALID_UNPROTECTED)
    }

    /// `host_attrs` is what `host_ns_attrs` kept of the host's request.
    pub fn valid_unprotected(host_attrs: u64, level: usize) -> Self {
        debug_assert!(level >= RTT_MIN_BLOCK_LEVEL);
        match level {
            RTT_PAGE_LEVEL => Self(host_attrs | PAGE_NS),
            _ => Self(host_attrs | BLOCK_NS),
        }
    }

    pub fn table(pa: usize, level: usize) -> Self {
        debug_assert!(level < RTT_PAGE_LEVEL);
        Self(addr_level_mask(pa as u64, RTT_PAGE_LEVEL) | desc_type::L012_TABLE)
    }

    fn is_invalid(&self) -> bool {
        self.get_masked_value(S2TTE::DESC_TYPE) == desc_type::LX_INVALID
    }

    fn hipas(&self) -> u64 {
        self.get_masked_value(S2TTE::INVALID_HIPAS)
    }

    pub fn is_unassigned(&self) -> bool {
        self.is_invalid() && self.hipas() == invalid_hipas::UNASSIGNED
    }

    pub fn is_destroyed(&self) -> bool {
        self.is_invalid() && self.hipas() == invalid_hipas::DESTROYED
    }

    pub fn is_assigned(&self) -> bool {
        self.is_invalid() && self.hipas() == invalid_hipas::ASSIGNED
    }

    fn is_valid_shape(&self, level: usize, ns: bool) -> bool {
        if (self.get_masked(S2TTE::NS) != 0) != ns {
            return false;
        }
        let desc = self.get_masked_value(S2TTE::DESC_TYPE);
        (level == RTT_PAGE_LEVEL && desc == desc_type::L3_PAGE)
            || (level == RTT_MIN_BLOCK_LEVEL && desc == desc_type::L012_BLOCK)
    }

    pub fn is_valid(&self, level: usize) -> bool {
        self.is_valid_shape(level, false)
    }

    pub fn is_valid_unprotected(&self, level: usize) -> bool {
        self.is_valid_shape(level, true)
    }

    // `level` is the level the walk reached.
    pub fn is_table(&self, level: usize) -> bool {
        level < RTT_PAGE_LEVEL && self.get_masked_value(S2TTE::DESC_TYPE) == desc_type::L012_TABLE
    }

    /// RIPAS of an invalid entry, or RAM for a valid one.
    pub fn get_ripas(&self) -> u64 {
        let ripas = self.get_masked_value(S2TTE::INVALID_RIPAS);

        if !self.is_invalid() && ripas != invalid_ripas::RAM {
            panic!("valid s2tte {:#X} without RIPAS RAM", self.get());
        }
        ripas
    }

    pub fn pa(&self, level: usize) -> usize {
        addr_level_mask(self.get(), level) as usize
    }

    pub fn pa_table(&self) -> usize {
        addr_level_mask(self.get(), RTT_PAGE_LEVEL) as usize
    }
}

/// One translation table, laid out exactly as the hardware walker reads it.
#[repr(C, align(4096))]
pub struct RttPage([u64; S2TTES_PER_S2TT]);

impl Content for RttPage {}

crate::const_assert_size!(RttPage, 4096);

impl RttPage {
    pub fn get(&self, idx: usize) -> S2TTE {
        // entries may be updated under the hardware walker
        S2TTE::new(unsafe { core::ptr::read_volatile(&self.0[idx]) })
    }

    pub fn set(&mut self, idx: usize, s2tte: S2TTE) {
        unsafe { core::ptr::write_volatile(&mut self.0[idx], s2tte.get()) }
    }

    fn fill(&mut self, mut f: impl FnMut(usize) -> S2TTE) {
        for i in 0..S2TTES_PER_S2TT {
            self.set(i, f(i));
        }
        // the table is populated before it is linked
        dsb_ish();
    }

    pub fn init_unassigned(&mut self, ripas: u64) {
        self.fill(|_| S2TTE::unassigned(ripas));
    }

    pub fn init_destroyed(&mut self) {
        self.fill(|_| S2TTE::destroyed());
    }

    pub fn init_assigned_empty(&mut self, pa: usize, level: usize) {
        self.fill(|i| S2TTE::assigned_empty(pa + i * map_size(level), level));
    }

    pub fn init_valid(&mut self, pa: usize, level: usize) {
        self.fill(|i| S2TTE::valid(pa + i * map_size(level), level));
    }

    /// `attrs` carries the host attributes without an address.
    pub fn init_valid_unprotected(&mut self, attrs: u64, pa: usize, level: usize) {
        self.fill(|i| S2TTE::valid_unprotected(attrs | (pa + i * map_size(level)) as u64, level));
    }

    /// The RIPAS shared by every entry, if all of them are unassigned with
    /// the same RIPAS.
    pub fn is_unassigned_block(&self) -> Option<u64> {
        let first = self.get(0);
        if !first.is_unassigned() {
            return None;
        }
        let ripas = first.get_ripas();

        for i in 1..S2TTES_PER_S2TT {
            let s2tte = self.get(i);
            if !s2tte.is_unassigned() || s2tte.get_ripas() != ripas {
                return None;
            }
        }
        Some(ripas)
    }

    pub fn is_destroyed_block(&self) -> bool {
        (0..S2TTES_PER_S2TT).all(|i| self.get(i).is_destroyed())
    }

    // Entries at `level` must map a contiguous range whose base is aligned
    // to the parent level.
    fn maps_block(&self, level: usize, check: impl Fn(&S2TTE) -> bool) -> bool {
        let first = self.get(0);
        if !check(&first) {
            return false;
        }
        let base = first.pa(level);
        if !addr_is_level_aligned(base, level - 1) {
            return false;
        }

        (1..S2TTES_PER_S2TT).all(|i| {
            let s2tte = self.get(i);
            check(&s2tte) && s2tte.pa(level) == base + i * map_size(level)
        })
    }

    pub fn maps_assigned_block(&self, level: usize) -> bool {
        self.maps_block(level, |s2tte| s2tte.is_assigned())
    }

    pub fn maps_valid_block(&self, level: usize) -> bool {
        self.maps_block(level, |s2tte| s2tte.is_valid(level))
    }

    pub fn maps_valid_unprotected_block(&self, level: usize) -> bool {
        let attrs = self.get(0).get_masked(NS_ATTR_HOST_MASK);
        self.maps_block(level, |s2tte| {
            s2tte.is_valid_unprotected(level) && s2tte.get_masked(NS_ATTR_HOST_MASK) == attrs
        })
    }
}
