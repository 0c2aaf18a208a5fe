use crate::config::MAX_DEV_MEM_GRANULES;
use crate::event::Mainloop;
use crate::granule::{GranuleGuard, GranuleState, GRANULE_SIZE};
use crate::host::{self, DataPage};
use crate::listen;
use crate::measurement::RMI_MEASURE_CONTENT;
use crate::realm::mm::stage2_tte::{
    addr_is_level_aligned, host_ns_is_valid, invalid_ripas, map_size, RTT_MIN_BLOCK_LEVEL,
    RTT_PAGE_LEVEL,
};
use crate::realm::rd::{Rd, RealmInfo, State};
use crate::rec::Rec;
use crate::rmi;
use crate::rmi::error::Error;
use crate::rtt::{self, AttachDevice};
use crate::Monitor;

extern crate alloc;
use alloc::vec::Vec;

/// DATA_CREATE flag: the granule describes a device to attach.
pub const DATA_FLAG_DEV_ATTACH: usize = 1 << 1;
const DATA_FLAGS_MASK: usize = RMI_MEASURE_CONTENT | DATA_FLAG_DEV_ATTACH;

const NR_BARS: usize = 6;
const BAR_SIZES_OFFSET: usize = 20;
const BAR_ADDRS_OFFSET: usize = 48;

fn validate_map_addr(ipa: usize, level: usize, info: &RealmInfo) -> bool {
    ipa < info.ipa_size() && addr_is_level_aligned(ipa, level)
}

// The starting level tables belong to the RD and cannot be created or
// destroyed on their own.
fn validate_rtt_structure_cmds(ipa: usize, level: usize, info: &RealmInfo) -> bool {
    let min_level = info.s2_starting_level + 1;
    (min_level..=RTT_PAGE_LEVEL).contains(&level) && validate_map_addr(ipa, level, info)
}

fn validate_rtt_map_cmds(ipa: usize, level: usize, info: &RealmInfo) -> bool {
    (RTT_MIN_BLOCK_LEVEL..=RTT_PAGE_LEVEL).contains(&level) && validate_map_addr(ipa, level, info)
}

fn validate_rtt_entry_cmds(ipa: usize, level: usize, info: &RealmInfo) -> bool {
    (info.s2_starting_level..=RTT_PAGE_LEVEL).contains(&level)
        && validate_map_addr(ipa, level, info)
}

/// A device descriptor: the size, IPA and PA of each BAR, big-endian.
struct BarDescriptor {
    sizes: [usize; NR_BARS],
    ipas: [usize; NR_BARS],
    pas: [usize; NR_BARS],
}

impl BarDescriptor {
    fn parse(page: &DataPage) -> Self {
        let bytes = page.as_slice();
        let be32 = |off: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[off..off + 4]);
            u32::from_be_bytes(raw) as usize
        };
        let be64 = |off: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[off..off + 8]);
            u64::from_be_bytes(raw) as usize
        };

        let mut desc = Self {
            sizes: [0; NR_BARS],
            ipas: [0; NR_BARS],
            pas: [0; NR_BARS],
        };
        for i in 0..NR_BARS {
            desc.sizes[i] = be32(BAR_SIZES_OFFSET + i * 4);
            desc.ipas[i] = be64(BAR_ADDRS_OFFSET + i * 16);
            desc.pas[i] = be64(BAR_ADDRS_OFFSET + i * 16 + 8);
        }
        desc
    }

    /// Every (ipa, pa) granule pair the BARs cover.
    fn pages(&self) -> Result<Vec<(usize, usize)>, Error> {
        let mut pages = Vec::new();
        for i in 0..NR_BARS {
            for off in (0..self.sizes[i]).step_by(GRANULE_SIZE) {
                if pages.len() == MAX_DEV_MEM_GRANULES {
                    return Err(Error::RmiErrorInput);
                }
                let ipa = self.ipas[i].checked_add(off).ok_or(Error::RmiErrorInput)?;
                let pa = self.pas[i].checked_add(off).ok_or(Error::RmiErrorInput)?;
                pages.push((ipa, pa));
            }
        }
        Ok(pages)
    }
}

/// Every BAR page must already be realm data mapped at the IPA the
/// descriptor names.
fn check_bars(rmm: &Monitor, rd: &GranuleGuard<'_>, pages: &[(usize, usize)]) -> Result<(), Error> {
    for (_, pa) in pages.iter() {
        if rmm.granules.lock(*pa, GranuleState::Data).is_err() {
            warn!("BAR page {:X} is not realm data", pa);
            return Err(Error::RmiErrorInput);
        }
    }

    let info = *rd.content::<Rd>().info();
    if pages
        .iter()
        .any(|(ipa, _)| !validate_map_addr(*ipa, RTT_PAGE_LEVEL, &info))
    {
        return Err(Error::RmiErrorInput);
    }
    rtt::check_mappings(rmm, rd, pages.iter().copied()).map_err(|_| Error::RmiErrorInput)
}

fn data_create(
    rmm: &Monitor,
    arg: &[usize],
    src: Option<(&DataPage, usize)>,
    bars: Option<&[(usize, usize)]>,
) -> Result<(), Error> {
    let (data, rd, ipa) = (arg[0], arg[1], arg[2]);

    let (mut data_granule, mut rd_granule) =
        rmm.granules
            .lock_two(data, GranuleState::Delegated, rd, GranuleState::RD)?;

    let rd_obj = rd_granule.content::<Rd>();
    if src.is_some() && !rd_obj.at_state(State::New) {
        return Err(Error::RmiErrorRealm);
    }
    let info = rd_obj.info();
    if !info.addr_in_par(ipa) || !validate_map_addr(ipa, RTT_PAGE_LEVEL, info) {
        return Err(Error::RmiErrorInput);
    }

    let attach = |dev: usize| {
        rmm.gpt.attach_device(dev).map_err(|e| {
            warn!("attaching device {:X} refused by EL3: {:?}", dev, e);
            Error::RmiErrorInput
        })
    };
    let attach: Option<AttachDevice<'_>> = match bars {
        Some(pages) => {
            check_bars(rmm, &rd_granule, pages)?;
            Some(&attach as AttachDevice<'_>)
        }
        None => None,
    };

    let contents = src.map(|(page, flags)| (page, flags & RMI_MEASURE_CONTENT));
    rtt::data_create(rmm, &mut rd_granule, &mut data_granule, ipa, contents, attach)
}

pub fn set_event_handler(mainloop: &mut Mainloop) {
    listen!(mainloop, rmi::RTT_CREATE, |arg, _ret, rmm| {
        let (rtt_addr, ipa, level) = (arg[0], arg[2], arg[3]);

        let (rtt_granule, rd_granule) =
            rmm.granules
                .lock_two(rtt_addr, GranuleState::Delegated, arg[1], GranuleState::RD)?;
        if !validate_rtt_structure_cmds(ipa, level, rd_granule.content::<Rd>().info()) {
            return Err(Error::RmiErrorInput);
        }

        rtt::create(rmm, rd_granule, rtt_granule, ipa, level)
    });

    listen!(mainloop, rmi::RTT_DESTROY, |arg, _ret, rmm| {
        let (rtt_addr, ipa, level) = (arg[0], arg[2], arg[3]);

        let rd_granule = rmm.granules.lock(arg[1], GranuleState::RD)?;
        if !validate_rtt_structure_cmds(ipa, level, rd_granule.content::<Rd>().info()) {
            return Err(Error::RmiErrorInput);
        }

        rtt::destroy(rmm, rd_granule, rtt_addr, ipa, level)
    });

    listen!(mainloop, rmi::RTT_FOLD, |arg, _ret, rmm| {
        let (rtt_addr, ipa, level) = (arg[0], arg[2], arg[3]);

        let rd_granule = rmm.granules.lock(arg[1], GranuleState::RD)?;
        if !validate_rtt_structure_cmds(ipa, level, rd_granule.content::<Rd>().info()) {
            return Err(Error::RmiErrorInput);
        }

        rtt::fold(rmm, rd_granule, rtt_addr, ipa, level)
    });

    // Map an unprotected IPA to a non-secure PA.
    listen!(mainloop, rmi::RTT_MAP_UNPROTECTED, |arg, _ret, rmm| {
        let (ipa, level, host_s2tte) = (arg[1], arg[2], arg[3] as u64);
        if level > RTT_PAGE_LEVEL || !host_ns_is_valid(host_s2tte, level) {
            return Err(Error::RmiErrorInput);
        }

        let rd_granule = rmm.granules.lock(arg[0], GranuleState::RD)?;
        let info = rd_granule.content::<Rd>().info();
        // An unassigned entry may also translate a protected IPA.
        if !validate_rtt_map_cmds(ipa, level, info) || info.addr_in_par(ipa) {
            return Err(Error::RmiErrorInput);
        }

        rtt::map_unprotected(rmm, rd_granule, ipa, level, host_s2tte)
    });

    listen!(mainloop, rmi::RTT_UNMAP_UNPROTECTED, |arg, _ret, rmm| {
        let (ipa, level) = (arg[1], arg[2]);

        let rd_granule = rmm.granules.lock(arg[0], GranuleState::RD)?;
        if !validate_rtt_map_cmds(ipa, level, rd_granule.content::<Rd>().info()) {
            return Err(Error::RmiErrorInput);
        }

        rtt::unmap_unprotected(rmm, rd_granule, ipa, level)
    });

    listen!(mainloop, rmi::RTT_READ_ENTRY, |arg, ret, rmm| {
        let (ipa, level) = (arg[1], arg[2]);

        let rd_granule = rmm.granules.lock(arg[0], GranuleState::RD)?;
        if !validate_rtt_entry_cmds(ipa, level, rd_granule.content::<Rd>().info()) {
            return Err(Error::RmiErrorInput);
        }

        let res = rtt::read_entry(rmm, rd_granule, ipa, level);
        ret[1..5].copy_from_slice(&res);
        Ok(())
    });

    listen!(mainloop, rmi::DATA_CREATE, |arg, _ret, rmm| {
        let (src, flags) = (arg[3], arg[4]);
        if flags & !DATA_FLAGS_MASK != 0 {
            return Err(Error::RmiErrorInput);
        }

        // the copy is taken up front, the source stays with the host
        let page = host::copy_from::<DataPage>(&rmm.granules, src).ok_or(Error::RmiErrorInput)?;
        let bars = match flags & DATA_FLAG_DEV_ATTACH {
            0 => None,
            _ => Some(BarDescriptor::parse(&page).pages()?),
        };
        data_create(rmm, arg, Some((&page, flags)), bars.as_deref())
    });

    listen!(mainloop, rmi::DATA_CREATE_UNKNOWN, |arg, _ret, rmm| {
        data_create(rmm, arg, None, None)
    });

    listen!(mainloop, rmi::DATA_DESTROY, |arg, ret, rmm| {
        let ipa = arg[1];

        let rd_granule = rmm.granules.lock(arg[0], GranuleState::RD)?;
        if !validate_map_addr(ipa, RTT_PAGE_LEVEL, rd_granule.content::<Rd>().info()) {
            return Err(Error::RmiErrorInput);
        }

        ret[1] = rtt::data_destroy(rmm, rd_granule, ipa)?;
        Ok(())
    });

    listen!(mainloop, rmi::RTT_INIT_RIPAS, |arg, _ret, rmm| {
        let (ipa, level) = (arg[1], arg[2]);

        let mut rd_granule = rmm.granules.lock(arg[0], GranuleState::RD)?;
        let rd = rd_granule.content::<Rd>();
        if !rd.at_state(State::New) {
            return Err(Error::RmiErrorRealm);
        }
        let info = rd.info();
        if !validate_rtt_entry_cmds(ipa, level, info) || !info.addr_in_par(ipa) {
            return Err(Error::RmiErrorInput);
        }

        rtt::init_ripas(rmm, &mut rd_granule, ipa, level)
    });

    listen!(mainloop, rmi::RTT_SET_RIPAS, |arg, _ret, rmm| {
        let (rd, ipa, level, ripas) = (arg[0], arg[2], arg[3], arg[4] as u64);
        if ripas > invalid_ripas::RAM {
            return Err(Error::RmiErrorInput);
        }

        let (rd_granule, mut rec_granule) =
            rmm.granules
                .lock_two(rd, GranuleState::RD, arg[1], GranuleState::Rec)?;
        // running on another PE
        if rec_granule.refcount_acquire() != 0 {
            return Err(Error::RmiErrorInUse);
        }

        let rec = rec_granule.content_mut::<Rec>();
        if rec.owner() != rd {
            return Err(Error::RmiErrorRec);
        }
        if ripas != rec.ripas_value() as u64 || ipa != rec.ripas_addr() {
            return Err(Error::RmiErrorInput);
        }

        if !validate_rtt_entry_cmds(ipa, level, rd_granule.content::<Rd>().info()) {
            return Err(Error::RmiErrorInput);
        }
        // the chunk must stay inside the requested region
        if ipa + map_size(level) > rec.ripas_end() {
            return Err(Error::RmiErrorInput);
        }

        rtt::set_ripas(rmm, &rd_granule, rec, ipa, level, ripas)
    });
}

#[cfg(test)]
mod test {
    use crate::granule::{GranuleState, GRANULE_SIZE};
    use crate::measurement::{Measurement, MEASUREMENTS_SLOT_RIM};
    use crate::realm::mm::stage2_tte::{invalid_ripas, map_size, memattr, shareable, AP_RW};
    use crate::realm::rd::Rd;
    use crate::rec::Rec;
    use crate::rmi::error::Error;
    use crate::rmi::rtt_entry_state::*;
    use crate::rmi::*;
    use crate::test_utils::*;

    use super::DATA_FLAG_DEV_ATTACH;

    use core::sync::atomic::Ordering;

    fn err(e: Error) -> usize {
        usize::from(e)
    }

    fn rim(monitor: &crate::Monitor, rd: usize) -> Measurement {
        let g = monitor.granules.lock(rd, GranuleState::RD).unwrap();
        g.content::<Rd>().measurements[MEASUREMENTS_SLOT_RIM]
    }

    fn refcount(monitor: &crate::Monitor, addr: usize, state: GranuleState) -> u64 {
        monitor.granules.lock(addr, state).unwrap().refcount()
    }

    fn read_entry(monitor: &crate::Monitor, realm: &TestRealm, ipa: usize, level: usize) -> [usize; 5] {
        rmi::<RTT_READ_ENTRY>(monitor, &[realm.rd, ipa, level])
    }

    /// A host page filled with `byte`.
    fn host_page(mem: &TestMemory, byte: u8) -> usize {
        let addr = mem.alloc_granule();
        unsafe { core::ptr::write_bytes(addr as *mut u8, byte, GRANULE_SIZE) };
        addr
    }

    fn data_create_unknown(monitor: &crate::Monitor, mem: &TestMemory, realm: &TestRealm, ipa: usize) -> usize {
        let data = mem.alloc_granule();
        delegate(monitor, data);
        let ret = rmi::<DATA_CREATE_UNKNOWN>(monitor, &[data, realm.rd, ipa]);
        assert_eq!(ret[0], SUCCESS);
        data
    }

    #[test]
    fn create_and_destroy_tables() {
        let mem = TestMemory::new(16);
        let (monitor, mock) = mock_monitor_with(&mem);
        let realm = realm_create(&monitor, &mem);

        // the starting level is 1, so level 2 is the first creatable one
        let rtt = mem.alloc_granule();
        delegate(&monitor, rtt);
        let ret = rmi::<RTT_CREATE>(&monitor, &[rtt, realm.rd, 0, 1]);
        assert_eq!(ret[0], err(Error::RmiErrorInput));
        // nothing links level 3 yet
        let ret = rmi::<RTT_CREATE>(&monitor, &[rtt, realm.rd, 0, 3]);
        assert_eq!(ret[0], err(Error::RmiErrorRtt(1)));
        // unaligned to the level
        let ret = rmi::<RTT_CREATE>(&monitor, &[rtt, realm.rd, 0x1000, 2]);
        assert_eq!(ret[0], err(Error::RmiErrorInput));

        let (l2, l3) = rtt_create_page_tables(&monitor, &mem, &realm, 0);
        assert_eq!(read_entry(&monitor, &realm, 0, 1), [SUCCESS, 1, RMI_TABLE, l2, 0]);
        assert_eq!(read_entry(&monitor, &realm, 0, 2), [SUCCESS, 2, RMI_TABLE, l3, 0]);
        assert_eq!(read_entry(&monitor, &realm, 0x5000, 3), [SUCCESS, 3, RMI_UNASSIGNED, 0, 0]);
        assert_eq!(refcount(&monitor, realm.rtt_base, GranuleState::RTT), 1);
        assert_eq!(refcount(&monitor, l2, GranuleState::RTT), 1);

        // the slot is taken
        let ret = rmi::<RTT_CREATE>(&monitor, &[rtt, realm.rd, 0, 2]);
        assert_eq!(ret[0], err(Error::RmiErrorRtt(1)));

        // `rtt` is not the table linked at (0, 3)
        let ret = rmi::<RTT_DESTROY>(&monitor, &[rtt, realm.rd, 0, 3]);
        assert_eq!(ret[0], err(Error::RmiErrorInput));
        let ret = rmi::<RTT_DESTROY>(&monitor, &[l2, realm.rd, 0, 2]);
        assert_eq!(ret[0], err(Error::RmiErrorInUse));

        assert_eq!(rmi::<RTT_DESTROY>(&monitor, &[l3, realm.rd, 0, 3])[0], SUCCESS);
        assert!(monitor.granules.lock(l3, GranuleState::Delegated).is_ok());
        assert_eq!(refcount(&monitor, l2, GranuleState::RTT), 0);
        assert_eq!(mock.tlbi_log().last(), Some(&(TEST_VMID, 0, 1)));
        // a protected range without a table is gone for good
        assert_eq!(read_entry(&monitor, &realm, 0x5000, 3), [SUCCESS, 2, RMI_DESTROYED, 0, 0]);

        // a new table below a destroyed entry is destroyed throughout
        let l3 = rtt_create(&monitor, &mem, &realm, 0, 3);
        assert_eq!(read_entry(&monitor, &realm, 0x5000, 3), [SUCCESS, 3, RMI_DESTROYED, 0, 0]);
        assert_eq!(refcount(&monitor, l2, GranuleState::RTT), 1);
        assert_eq!(rmi::<RTT_DESTROY>(&monitor, &[l3, realm.rd, 0, 3])[0], SUCCESS);
    }

    #[test]
    fn data_create_and_destroy() {
        let mem = TestMemory::new(24);
        let (monitor, mock) = mock_monitor_with(&mem);
        let realm = realm_create(&monitor, &mem);
        let (_, l3) = rtt_create_page_tables(&monitor, &mem, &realm, 0);

        let rim_before = rim(&monitor, realm.rd);
        assert_eq!(rmi::<RTT_INIT_RIPAS>(&monitor, &[realm.rd, 0x1000, 3])[0], SUCCESS);
        let rim_ripas = rim(&monitor, realm.rd);
        assert_ne!(rim_before, rim_ripas);
        assert_eq!(
            read_entry(&monitor, &realm, 0x1000, 3),
            [SUCCESS, 3, RMI_UNASSIGNED, 0, invalid_ripas::RAM as usize]
        );
        // only unassigned entries take an initial RIPAS
        let ret = rmi::<RTT_INIT_RIPAS>(&monitor, &[realm.rd, 0, 2]);
        assert_eq!(ret[0], err(Error::RmiErrorRtt(2)));

        let src = host_page(&mem, 0xa5);
        let data = mem.alloc_granule();
        delegate(&monitor, data);

        // the source must belong to the host
        let ret = rmi::<DATA_CREATE>(&monitor, &[data, realm.rd, 0x1000, l3, 1]);
        assert_eq!(ret[0], err(Error::RmiErrorInput));
        // outside the protected range
        let ipa = 1 << (TEST_IPA_BITS - 1);
        let ret = rmi::<DATA_CREATE>(&monitor, &[data, realm.rd, ipa, src, 1]);
        assert_eq!(ret[0], err(Error::RmiErrorInput));
        let ret = rmi::<DATA_CREATE>(&monitor, &[data, realm.rd, 0x1000, src, 1 << 4]);
        assert_eq!(ret[0], err(Error::RmiErrorInput));

        assert_eq!(rmi::<DATA_CREATE>(&monitor, &[data, realm.rd, 0x1000, src, 1])[0], SUCCESS);
        assert_ne!(rim(&monitor, realm.rd), rim_ripas);
        assert_eq!(
            read_entry(&monitor, &realm, 0x1000, 3),
            [SUCCESS, 3, RMI_ASSIGNED, data, invalid_ripas::RAM as usize]
        );
        assert_eq!(unsafe { *((data + 0x800) as *const u8) }, 0xa5);

        // the entry is taken now
        let other = mem.alloc_granule();
        delegate(&monitor, other);
        let ret = rmi::<DATA_CREATE>(&monitor, &[other, realm.rd, 0x1000, src, 0]);
        assert_eq!(ret[0], err(Error::RmiErrorRtt(3)));

        // RIPAS EMPTY gives an assigned but unmapped page
        let ret = rmi::<DATA_CREATE_UNKNOWN>(&monitor, &[other, realm.rd, 0x2000]);
        assert_eq!(ret[0], SUCCESS);
        assert_eq!(
            read_entry(&monitor, &realm, 0x2000, 3),
            [SUCCESS, 3, RMI_ASSIGNED, other, invalid_ripas::EMPTY as usize]
        );
        assert_eq!(refcount(&monitor, l3, GranuleState::RTT), 2);

        let ret = rmi::<DATA_DESTROY>(&monitor, &[realm.rd, 0x1000]);
        assert_eq!(ret[..2], [SUCCESS, data]);
        assert_eq!(mock.tlbi_log().last(), Some(&(TEST_VMID, 0x1000, 1)));
        assert_eq!(read_entry(&monitor, &realm, 0x1000, 3), [SUCCESS, 3, RMI_DESTROYED, 0, 0]);
        assert!(monitor.granules.lock(data, GranuleState::Delegated).is_ok());
        assert_eq!(unsafe { *((data + 0x800) as *const u8) }, 0);

        let invalidations = mock.tlbi_log().len();
        let ret = rmi::<DATA_DESTROY>(&monitor, &[realm.rd, 0x2000]);
        assert_eq!(ret[..2], [SUCCESS, other]);
        // nothing was mapped
        assert_eq!(mock.tlbi_log().len(), invalidations);
        assert_eq!(read_entry(&monitor, &realm, 0x2000, 3), [SUCCESS, 3, RMI_UNASSIGNED, 0, 0]);
        assert_eq!(refcount(&monitor, l3, GranuleState::RTT), 0);

        let ret = rmi::<DATA_DESTROY>(&monitor, &[realm.rd, 0x2000]);
        assert_eq!(ret[0], err(Error::RmiErrorRtt(3)));
    }

    #[test]
    fn measured_data_needs_a_new_realm() {
        let mem = TestMemory::new(16);
        let monitor = mock_monitor(&mem);
        let realm = realm_create(&monitor, &mem);
        rtt_create_page_tables(&monitor, &mem, &realm, 0);
        assert_eq!(rmi::<REALM_ACTIVATE>(&monitor, &[realm.rd])[0], SUCCESS);

        let src = host_page(&mem, 1);
        let data = mem.alloc_granule();
        delegate(&monitor, data);
        let ret = rmi::<DATA_CREATE>(&monitor, &[data, realm.rd, 0, src, 0]);
        assert_eq!(ret[0], err(Error::RmiErrorRealm));
        let ret = rmi::<RTT_INIT_RIPAS>(&monitor, &[realm.rd, 0, 3]);
        assert_eq!(ret[0], err(Error::RmiErrorRealm));

        // the host may still hand out pages it does not know the contents of
        let ret = rmi::<DATA_CREATE_UNKNOWN>(&monitor, &[data, realm.rd, 0]);
        assert_eq!(ret[0], SUCCESS);
        assert!(monitor.granules.lock(data, GranuleState::Data).is_ok());
    }

    #[test]
    fn map_and_unmap_unprotected() {
        let mem = TestMemory::new(16);
        let (monitor, mock) = mock_monitor_with(&mem);
        let realm = realm_create(&monitor, &mem);
        let ipa = 1 << (TEST_IPA_BITS - 1);
        let l2 = rtt_create(&monitor, &mem, &realm, ipa, 2);

        let ns_pa = 0x1_0020_0000usize;
        let s2tte = ns_pa as u64 | memattr::FWB_NORMAL_WB | AP_RW | shareable::INNER;

        let ret = rmi::<RTT_MAP_UNPROTECTED>(&monitor, &[realm.rd, ipa, 2, (s2tte | 1 << 55) as usize]);
        assert_eq!(ret[0], err(Error::RmiErrorInput));
        // a protected IPA
        let ret = rmi::<RTT_MAP_UNPROTECTED>(&monitor, &[realm.rd, 0, 2, s2tte as usize]);
        assert_eq!(ret[0], err(Error::RmiErrorInput));

        let ret = rmi::<RTT_MAP_UNPROTECTED>(&monitor, &[realm.rd, ipa, 2, s2tte as usize]);
        assert_eq!(ret[0], SUCCESS);
        assert_eq!(read_entry(&monitor, &realm, ipa, 2), [SUCCESS, 2, RMI_VALID_NS, s2tte as usize, 0]);
        assert_eq!(refcount(&monitor, l2, GranuleState::RTT), 1);

        let ret = rmi::<RTT_MAP_UNPROTECTED>(&monitor, &[realm.rd, ipa, 2, s2tte as usize]);
        assert_eq!(ret[0], err(Error::RmiErrorRtt(2)));

        // the block maps through a level 3 table as well
        let l3 = rtt_create(&monitor, &mem, &realm, ipa, 3);
        assert_eq!(refcount(&monitor, l3, GranuleState::RTT), 512);
        let page = s2tte as usize + 0x3000;
        assert_eq!(read_entry(&monitor, &realm, ipa + 0x3000, 3), [SUCCESS, 3, RMI_VALID_NS, page, 0]);

        let ret = rmi::<RTT_UNMAP_UNPROTECTED>(&monitor, &[realm.rd, ipa + 0x3000, 3]);
        assert_eq!(ret[0], SUCCESS);
        assert_eq!(mock.tlbi_log().last(), Some(&(TEST_VMID, ipa + 0x3000, 1)));
        assert_eq!(read_entry(&monitor, &realm, ipa + 0x3000, 3), [SUCCESS, 3, RMI_UNASSIGNED, 0, 0]);
        let ret = rmi::<RTT_UNMAP_UNPROTECTED>(&monitor, &[realm.rd, ipa + 0x3000, 3]);
        assert_eq!(ret[0], err(Error::RmiErrorRtt(3)));
        assert_eq!(refcount(&monitor, l3, GranuleState::RTT), 511);
    }

    #[test]
    fn fold_unassigned_table() {
        let mem = TestMemory::new(16);
        let (monitor, mock) = mock_monitor_with(&mem);
        let realm = realm_create(&monitor, &mem);
        let (l2, l3) = rtt_create_page_tables(&monitor, &mem, &realm, 0);

        // mixed RIPAS cannot be folded
        assert_eq!(rmi::<RTT_INIT_RIPAS>(&monitor, &[realm.rd, 0x1000, 3])[0], SUCCESS);
        let ret = rmi::<RTT_FOLD>(&monitor, &[l3, realm.rd, 0, 3]);
        assert_eq!(ret[0], err(Error::RmiErrorInUse));
        let ret = rmi::<RTT_FOLD>(&monitor, &[l2, realm.rd, 0, 3]);
        assert_eq!(ret[0], err(Error::RmiErrorInput));

        let other = rtt_create(&monitor, &mem, &realm, map_size(2), 3);
        assert_eq!(refcount(&monitor, l2, GranuleState::RTT), 2);
        assert_eq!(rmi::<RTT_FOLD>(&monitor, &[other, realm.rd, map_size(2), 3])[0], SUCCESS);
        assert_eq!(mock.tlbi_log().last(), Some(&(TEST_VMID, map_size(2), 1)));
        assert!(monitor.granules.lock(other, GranuleState::Delegated).is_ok());
        assert_eq!(refcount(&monitor, l2, GranuleState::RTT), 1);
        assert_eq!(
            read_entry(&monitor, &realm, map_size(2), 3),
            [SUCCESS, 2, RMI_UNASSIGNED, 0, invalid_ripas::EMPTY as usize]
        );
    }

    #[test]
    fn fold_and_unfold_assigned_block() {
        let mem = TestMemory::new(1100);
        let (monitor, mock) = mock_monitor_with(&mem);
        let realm = realm_create(&monitor, &mem);
        let (l2, l3) = rtt_create_page_tables(&monitor, &mem, &realm, 0);

        let block = map_size(2);
        let first = mem.alloc_granules(1024);
        let base = (first + block - 1) & !(block - 1);
        for i in 0..512 {
            let data = base + i * GRANULE_SIZE;
            delegate(&monitor, data);
            let ret = rmi::<DATA_CREATE_UNKNOWN>(&monitor, &[data, realm.rd, i * GRANULE_SIZE]);
            assert_eq!(ret[0], SUCCESS);
        }
        assert_eq!(refcount(&monitor, l3, GranuleState::RTT), 512);

        // l2 still links the level 3 table
        let ret = rmi::<RTT_FOLD>(&monitor, &[l2, realm.rd, 0, 2]);
        assert_eq!(ret[0], err(Error::RmiErrorInUse));

        assert_eq!(rmi::<RTT_FOLD>(&monitor, &[l3, realm.rd, 0, 3])[0], SUCCESS);
        assert_eq!(mock.tlbi_log().last(), Some(&(TEST_VMID, 0, 1)));
        assert_eq!(
            read_entry(&monitor, &realm, 0, 2),
            [SUCCESS, 2, RMI_ASSIGNED, base, invalid_ripas::EMPTY as usize]
        );
        assert!(monitor.granules.lock(l3, GranuleState::Delegated).is_ok());
        // the block entry is still a live entry of the level 2 table
        assert_eq!(refcount(&monitor, l2, GranuleState::RTT), 1);

        let l3 = rtt_create(&monitor, &mem, &realm, 0, 3);
        assert_eq!(refcount(&monitor, l3, GranuleState::RTT), 512);
        assert_eq!(
            read_entry(&monitor, &realm, 0x7000, 3),
            [SUCCESS, 3, RMI_ASSIGNED, base + 0x7000, invalid_ripas::EMPTY as usize]
        );
    }

    #[test]
    fn set_ripas_follows_the_request() {
        let mem = TestMemory::new(64);
        let (monitor, mock) = mock_monitor_with(&mem);
        let realm = realm_create(&monitor, &mem);
        let other = realm_create_with(&monitor, &mem, |p| p.vmid = TEST_VMID + 1);
        let rec = rec_create(&monitor, &mem, &realm, 0);
        rtt_create_page_tables(&monitor, &mem, &realm, 0);

        assert_eq!(rmi::<RTT_INIT_RIPAS>(&monitor, &[realm.rd, 0x1000, 3])[0], SUCCESS);
        let data = data_create_unknown(&monitor, &mem, &realm, 0x1000);

        {
            let mut g = monitor.granules.lock(rec, GranuleState::Rec).unwrap();
            g.content_mut::<Rec>().set_ripas(0, 0x2000, invalid_ripas::EMPTY as u8);
        }

        let set_ripas = |rd, ipa, ripas| rmi::<RTT_SET_RIPAS>(&monitor, &[rd, rec, ipa, 3, ripas])[0];
        assert_eq!(set_ripas(other.rd, 0, 0), err(Error::RmiErrorRec));
        // not the next chunk of the request
        assert_eq!(set_ripas(realm.rd, 0x1000, 0), err(Error::RmiErrorInput));
        assert_eq!(set_ripas(realm.rd, 0, 1), err(Error::RmiErrorInput));
        assert_eq!(set_ripas(realm.rd, 0, 2), err(Error::RmiErrorInput));

        assert_eq!(set_ripas(realm.rd, 0, 0), SUCCESS);
        assert_eq!(set_ripas(realm.rd, 0x1000, 0), SUCCESS);
        assert_eq!(mock.tlbi_log().last(), Some(&(TEST_VMID, 0x1000, 1)));
        assert_eq!(
            read_entry(&monitor, &realm, 0x1000, 3),
            [SUCCESS, 3, RMI_ASSIGNED, data, invalid_ripas::EMPTY as usize]
        );
        // past the end of the request
        assert_eq!(set_ripas(realm.rd, 0x2000, 0), err(Error::RmiErrorInput));

        let g = monitor.granules.lock(rec, GranuleState::Rec).unwrap();
        assert_eq!(g.content::<Rec>().ripas_addr(), 0x2000);
    }

    fn write_bar(page: usize, bar: usize, size: u32, ipa: u64, pa: u64) {
        let bytes = unsafe { core::slice::from_raw_parts_mut(page as *mut u8, GRANULE_SIZE) };
        let sizes = 20 + bar * 4;
        bytes[sizes..sizes + 4].copy_from_slice(&size.to_be_bytes());
        let addrs = 48 + bar * 16;
        bytes[addrs..addrs + 8].copy_from_slice(&ipa.to_be_bytes());
        bytes[addrs + 8..addrs + 16].copy_from_slice(&pa.to_be_bytes());
    }

    #[test]
    fn device_attach_checks_the_bars() {
        let mem = TestMemory::new(24);
        let (monitor, mock) = mock_monitor_with(&mem);
        let realm = realm_create(&monitor, &mem);
        rtt_create_page_tables(&monitor, &mem, &realm, 0);

        let bar = mem.alloc_granules(2);
        for (i, ipa) in [0x3000, 0x4000].iter().enumerate() {
            let pa = bar + i * GRANULE_SIZE;
            delegate(&monitor, pa);
            assert_eq!(rmi::<DATA_CREATE_UNKNOWN>(&monitor, &[pa, realm.rd, *ipa])[0], SUCCESS);
        }

        // the second BAR page is not mapped where the descriptor says
        let src = host_page(&mem, 0);
        write_bar(src, 0, 0x2000, 0x4000, bar as u64);
        let dev = mem.alloc_granule();
        delegate(&monitor, dev);
        let rim_before = rim(&monitor, realm.rd);
        let ret = rmi::<DATA_CREATE>(&monitor, &[dev, realm.rd, 0x1000, src, DATA_FLAG_DEV_ATTACH]);
        assert_eq!(ret[0], err(Error::RmiErrorInput));
        assert!(!mock.gpt_log().iter().any(|c| matches!(c, GptCall::Attach(_))));
        // nothing of the call is left behind
        assert!(monitor.granules.lock(dev, GranuleState::Delegated).is_ok());
        assert_eq!(read_entry(&monitor, &realm, 0x1000, 3), [SUCCESS, 3, RMI_UNASSIGNED, 0, 0]);
        assert_eq!(rim(&monitor, realm.rd), rim_before);

        // EL3 refuses the device
        write_bar(src, 0, 0x2000, 0x3000, bar as u64);
        mock.gpt_fail.store(true, Ordering::Relaxed);
        let ret = rmi::<DATA_CREATE>(&monitor, &[dev, realm.rd, 0x1000, src, DATA_FLAG_DEV_ATTACH | 1]);
        mock.gpt_fail.store(false, Ordering::Relaxed);
        assert_eq!(ret[0], err(Error::RmiErrorInput));
        assert_eq!(mock.gpt_log().last(), Some(&GptCall::Attach(dev)));
        assert!(monitor.granules.lock(dev, GranuleState::Delegated).is_ok());
        let bytes = unsafe { core::slice::from_raw_parts(dev as *const u8, GRANULE_SIZE) };
        assert!(bytes.iter().all(|b| *b == 0));
        assert_eq!(read_entry(&monitor, &realm, 0x1000, 3), [SUCCESS, 3, RMI_UNASSIGNED, 0, 0]);
        assert_eq!(rim(&monitor, realm.rd), rim_before);

        let ret = rmi::<DATA_CREATE>(&monitor, &[dev, realm.rd, 0x1000, src, DATA_FLAG_DEV_ATTACH | 1]);
        assert_eq!(ret[0], SUCCESS);
        assert_eq!(mock.gpt_log().last(), Some(&GptCall::Attach(dev)));
        assert_eq!(
            read_entry(&monitor, &realm, 0x1000, 3),
            [SUCCESS, 3, RMI_ASSIGNED, dev, invalid_ripas::EMPTY as usize]
        );
        assert_ne!(rim(&monitor, realm.rd), rim_before);
    }
}
