pub mod constraint;
pub mod error;
pub mod features;
pub mod gpt;
pub mod realm;
pub mod rec;
pub mod rtt;
pub mod version;

use crate::define_interface;

define_interface! {
    command {
         VERSION                = 0xc400_0150,
         GRANULE_DELEGATE       = 0xc400_0151,
         GRANULE_UNDELEGATE     = 0xc400_0152,
         DATA_CREATE            = 0xc400_0153,
         DATA_CREATE_UNKNOWN    = 0xc400_0154,
         DATA_DESTROY           = 0xc400_0155,
         REALM_ACTIVATE         = 0xc400_0157,
         REALM_CREATE           = 0xc400_0158,
         REALM_DESTROY          = 0xc400_0159,
         REC_CREATE             = 0xc400_015a,
         REC_DESTROY            = 0xc400_015b,
         REC_ENTER              = 0xc400_015c,
         RTT_CREATE             = 0xc400_015d,
         RTT_DESTROY            = 0xc400_015e,
         RTT_MAP_UNPROTECTED    = 0xc400_015f,
         RTT_READ_ENTRY         = 0xc400_0161,
         RTT_UNMAP_UNPROTECTED  = 0xc400_0162,
         FEATURES               = 0xc400_0165,
         RTT_FOLD               = 0xc400_0166,
         REC_AUX_COUNT          = 0xc400_0167,
         RTT_INIT_RIPAS         = 0xc400_0168,
         RTT_SET_RIPAS          = 0xc400_0169,
    }
}

pub const ABI_MAJOR_VERSION: usize = 1;
pub const ABI_MINOR_VERSION: usize = 0;

pub const HASH_ALGO_SHA256: u8 = 0;
pub const HASH_ALGO_SHA512: u8 = 1;

pub const SUCCESS: usize = 0;
pub const ERROR_INPUT: usize = 1;
pub const ERROR_REC: usize = 3;
/// Internal marker returned by RSI handlers: go back into the realm.
pub const SUCCESS_REC_ENTER: usize = 4;

/// Answer to an unknown function ID.
pub const NOT_SUPPORTED: usize = !0;

// RmiRttEntryState represents the state of an RTTE
pub mod rtt_entry_state {
    pub const RMI_UNASSIGNED: usize = 0;
    pub const RMI_DESTROYED: usize = 1;
    pub const RMI_ASSIGNED: usize = 2;
    pub const RMI_TABLE: usize = 3;
    pub const RMI_VALID_NS: usize = 4;
}

pub const EXIT_SYNC: u8 = 0;
pub const EXIT_IRQ: u8 = 1;
pub const EXIT_FIQ: u8 = 2;
pub const EXIT_RIPAS_CHANGE: u8 = 4;
pub const EXIT_HOST_CALL: u8 = 5;
pub const EXIT_SERROR: u8 = 6;
pub const EXIT_DEV_MEM: u8 = 0xA;
