use armv9a::define_bits;

pub const NR_GPRS: usize = 31;

define_bits!(
    EntryFlag,
    // Whether to trap WFE execution by the Realm.
    TRAP_WFE[3 - 3],
    // Whether to trap WFI execution by the Realm.
    TRAP_WFI[2 - 2],
    // Whether to inject a Synchronous External Abort (SEA) into the Realm.
    INJECT_SEA[1 - 1],
    // Whether the host has completed emulation for an Emulatable Data Abort.
    EMUL_MMIO[0 - 0]
);

/// The structure holds data passsed between the Host and the RMM
/// on Realm Execution Context (REC) entry and exit.
///
/// It lives in a non-secure granule. REC_ENTER works on a private copy.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Run {
    entry: Entry,
    exit: Exit,
}

/// Data passsed from the Host to the RMM on REC entry.
#[repr(C)]
#[derive(Clone, Copy)]
struct Entry {
    flags: u64,
    _reserved0: [u8; 0x200 - 0x8],
    gprs: [u64; NR_GPRS],
    _reserved1: [u8; 0x800 - 0x200 - NR_GPRS * 8],
}

/// Data passsed from the RMM to the Host on REC exit.
#[repr(C)]
#[derive(Clone, Copy)]
struct Exit {
    exit_reason: u8,
    _reserved0: [u8; 0x100 - 0x1],
    esr: u64,
    far: u64,
    hpfar: u64,
    _reserved1: [u8; 0x200 - 0x118],
    gprs: [u64; NR_GPRS],
    _reserved2: [u8; 0x500 - 0x200 - NR_GPRS * 8],
    ripas_base: u64,
    ripas_size: u64,
    ripas_value: u8,
    _reserved3: [u8; 0x600 - 0x511],
    imm: u16,
    _reserved4: [u8; 0x800 - 0x602],
}

crate::const_assert_size!(Run, 0x1000);
crate::const_assert_offset!(Run, exit, 0x800);
crate::const_assert_offset!(Entry, gprs, 0x200);
crate::const_assert_offset!(Exit, esr, 0x100);
crate::const_assert_offset!(Exit, gprs, 0x200);
crate::const_assert_offset!(Exit, ripas_base, 0x500);
crate::const_assert_offset!(Exit, imm, 0x600);

impl Run {
    pub fn entry_flags(&self) -> EntryFlag {
        EntryFlag::new(self.entry.flags)
    }

    pub fn entry_gpr(&self, idx: usize) -> u64 {
        self.entry.gprs[idx]
    }

    pub fn entry_gprs(&self) -> &[u64; NR_GPRS] {
        &self.entry.gprs
    }

    pub fn set_entry_flags(&mut self, flags: u64) {
        self.entry.flags = flags;
    }

    pub fn set_entry_gpr(&mut self, idx: usize, val: u64) {
        self.entry.gprs[idx] = val;
    }

    /// Forgets whatever the previous exit reported.
    pub fn clear_exit(&mut self) {
        self.exit = Exit::default();
    }

    pub fn exit_reason(&self) -> u8 {
        self.exit.exit_reason
    }

    pub fn exit_far(&self) -> u64 {
        self.exit.far
    }

    pub fn exit_hpfar(&self) -> u64 {
        self.exit.hpfar
    }

    pub fn exit_gpr(&self, idx: usize) -> u64 {
        self.exit.gprs[idx]
    }

    pub fn exit_ripas(&self) -> (u64, u64, u8) {
        (
            self.exit.ripas_base,
            self.exit.ripas_size,
            self.exit.ripas_value,
        )
    }

    pub fn exit_imm(&self) -> u16 {
        self.exit.imm
    }

    pub fn set_exit_reason(&mut self, exit_reason: u8) {
        self.exit.exit_reason = exit_reason;
    }

    pub fn set_esr(&mut self, esr: u64) {
        self.exit.esr = esr;
    }

    pub fn set_far(&mut self, far: u64) {
        self.exit.far = far;
    }

    pub fn set_hpfar(&mut self, hpfar: u64) {
        self.exit.hpfar = hpfar;
    }

    pub fn set_gpr(&mut self, idx: usize, val: u64) {
        self.exit.gprs[idx] = val;
    }

    pub fn set_ripas(&mut self, base: u64, size: u64, state: u8) {
        self.exit.ripas_base = base;
        self.exit.ripas_size = size;
        self.exit.ripas_value = state;
    }

    pub fn set_imm(&mut self, imm: u16) {
        self.exit.imm = imm;
    }
}

impl Default for Run {
    fn default() -> Self {
        Self {
            entry: Entry {
                flags: 0,
                _reserved0: [0; 0x200 - 0x8],
                gprs: [0; NR_GPRS],
                _reserved1: [0; 0x800 - 0x200 - NR_GPRS * 8],
            },
            exit: Exit::default(),
        }
    }
}

impl Default for Exit {
    fn default() -> Self {
        Self {
            exit_reason: 0,
            _reserved0: [0; 0x100 - 0x1],
            esr: 0,
            far: 0,
            hpfar: 0,
            _reserved1: [0; 0x200 - 0x118],
            gprs: [0; NR_GPRS],
            _reserved2: [0; 0x500 - 0x200 - NR_GPRS * 8],
            ripas_base: 0,
            ripas_size: 0,
            ripas_value: 0,
            _reserved3: [0; 0x600 - 0x511],
            imm: 0,
            _reserved4: [0; 0x800 - 0x602],
        }
    }
}

impl core::fmt::Debug for Run {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("rec::Run")
            .field("entry::flags", &format_args!("{:#X}", self.entry.flags))
            .field("entry::gprs", &self.entry.gprs)
            .field("exit::exit_reason", &self.exit.exit_reason)
            .field("exit::esr", &format_args!("{:#X}", self.exit.esr))
            .field("exit::far", &format_args!("{:#X}", self.exit.far))
            .field("exit::hpfar", &format_args!("{:#X}", self.exit.hpfar))
            .field("exit::imm", &self.exit.imm)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exit_record_is_in_the_upper_half() {
        let mut run = Run::default();
        run.set_exit_reason(5);
        run.set_esr(0x5a00_0000);
        run.set_gpr(3, 0x33);
        run.set_imm(0x1234);
        run.set_ripas(0x1000, 0x2000, 1);

        let bytes = unsafe {
            core::slice::from_raw_parts(&run as *const Run as *const u8, 0x1000)
        };
        assert_eq!(bytes[0x800], 5);
        assert_eq!(&bytes[0x900..0x908], &0x5a00_0000u64.to_le_bytes());
        assert_eq!(&bytes[0xa18..0xa20], &0x33u64.to_le_bytes());
        assert_eq!(bytes[0xd10], 1);
        assert_eq!(&bytes[0xe00..0xe02], &0x1234u16.to_le_bytes());
    }

    #[test]
    fn entry_flags() {
        let mut run = Run::default();
        run.set_entry_flags(0b11);
        assert_ne!(run.entry_flags().get_masked(EntryFlag::EMUL_MMIO), 0);
        assert_ne!(run.entry_flags().get_masked(EntryFlag::INJECT_SEA), 0);
        assert_eq!(run.entry_flags().get_masked(EntryFlag::TRAP_WFI), 0);
    }
}
