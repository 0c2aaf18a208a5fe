use crate::granule::Content;
use crate::measurement::{Measurement, MEASUREMENTS_SLOT_NR};

pub const RPV_SIZE: usize = 64;

/// The part of a realm's configuration needed to walk its tables.
///
/// Fixed at REALM_CREATE, so RECs keep a copy and can walk without taking
/// the RD lock.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RealmInfo {
    pub vmid: u16,
    pub ipa_bits: usize,
    pub s2_starting_level: usize,
    pub rtt_base: usize,
}

impl RealmInfo {
    pub fn ipa_size(&self) -> usize {
        1 << self.ipa_bits
    }

    pub fn par_size(&self) -> usize {
        self.ipa_size() / 2
    }

    /// Whether `ipa` is in the Protected Address Range.
    pub fn addr_in_par(&self, ipa: usize) -> bool {
        ipa < self.par_size()
    }

    /// Value programmed into VTTBR_EL2 while this realm runs.
    pub fn vttbr(&self) -> u64 {
        armv9a::bits_in_reg(armv9a::VTTBR_EL2::VMID, self.vmid as u64)
            | armv9a::bits_in_reg(armv9a::VTTBR_EL2::BADDR, (self.rtt_base >> 1) as u64)
    }
}

/// Realm Descriptor, stored in an RD granule.
#[repr(C)]
#[derive(Debug)]
pub struct Rd {
    info: RealmInfo,
    state: State,
    rtt_num_start: usize,
    rec_index: usize,
    num_rec_aux: usize,
    hash_algo: u8,
    rpv: [u8; RPV_SIZE],
    pub measurements: [Measurement; MEASUREMENTS_SLOT_NR],
}

impl Content for Rd {}

crate::const_assert_eq!((core::mem::size_of::<Rd>() <= crate::granule::GRANULE_SIZE), true);

impl Rd {
    pub fn init(
        &mut self,
        info: RealmInfo,
        rtt_num_start: usize,
        num_rec_aux: usize,
        hash_algo: u8,
        rpv: &[u8; RPV_SIZE],
    ) {
        *self = Self {
            info,
            state: State::New,
            rtt_num_start,
            rec_index: 0,
            num_rec_aux,
            hash_algo,
            rpv: *rpv,
            measurements: [Measurement::empty(); MEASUREMENTS_SLOT_NR],
        };
    }

    pub fn info(&self) -> &RealmInfo {
        &self.info
    }

    pub fn vmid(&self) -> u16 {
        self.info.vmid
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn set_state(&mut self, state: State) {
        self.state = state;
    }

    pub fn at_state(&self, compared: State) -> bool {
        self.state == compared
    }

    pub fn rtt_base(&self) -> usize {
        self.info.rtt_base
    }

    pub fn rtt_num_start(&self) -> usize {
        self.rtt_num_start
    }

    pub fn ipa_bits(&self) -> usize {
        self.info.ipa_bits
    }

    pub fn s2_starting_level(&self) -> usize {
        self.info.s2_starting_level
    }

    pub fn rec_index(&self) -> usize {
        self.rec_index
    }

    pub fn inc_rec_index(&mut self) {
        self.rec_index += 1;
    }

    pub fn num_rec_aux(&self) -> usize {
        self.num_rec_aux
    }

    pub fn ipa_size(&self) -> usize {
        self.info.ipa_size()
    }

    pub fn addr_in_par(&self, ipa: usize) -> bool {
        self.info.addr_in_par(ipa)
    }

    pub fn hash_algo(&self) -> u8 {
        self.hash_algo
    }

    pub fn personalization_value(&self) -> &[u8] {
        self.rpv.as_slice()
    }
}

// Zero is the state of a wiped RD granule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Null = 0,
    New,
    Active,
    SystemOff,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn protected_range_is_lower_half() {
        let info = RealmInfo {
            vmid: 3,
            ipa_bits: 33,
            s2_starting_level: 1,
            rtt_base: 0x8800_0000,
        };
        assert!(info.addr_in_par(0x0));
        assert!(info.addr_in_par(0xffff_f000));
        assert!(!info.addr_in_par(0x1_0000_0000));
        assert_eq!(info.ipa_size(), 0x2_0000_0000);
        assert_eq!(info.vttbr(), (3 << 48) | 0x8800_0000);
    }
}
