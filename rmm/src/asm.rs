pub const SMC_SUCCESS: usize = 0;

/// Issues an SMC to EL3 with up to seven arguments.
#[cfg(target_arch = "aarch64")]
pub fn smc(cmd: usize, args: &[usize]) -> [usize; 8] {
    use core::arch::asm;

    let mut ret: [usize; 8] = [0usize; 8];
    let mut padded_args: [usize; 8] = [0usize; 8];
    let start = 1;
    let end = start + args.len();

    if end > ret.len() {
        error!(
            "{} arguments exceed the registers available to an smc",
            args.len()
        );
        ret[0] = !0;
        return ret;
    }

    padded_args[0] = cmd;
    padded_args[start..end].copy_from_slice(args);

    unsafe {
        asm!(
            "smc #0x0",
            inlateout("x0") padded_args[0] => ret[0],
            inlateout("x1") padded_args[1] => ret[1],
            inlateout("x2") padded_args[2] => ret[2],
            inlateout("x3") padded_args[3] => ret[3],
            inlateout("x4") padded_args[4] => ret[4],
            inlateout("x5") padded_args[5] => ret[5],
            inlateout("x6") padded_args[6] => ret[6],
            inlateout("x7") padded_args[7] => ret[7],
        )
    }

    ret
}

#[cfg(not(target_arch = "aarch64"))]
pub fn smc(cmd: usize, args: &[usize]) -> [usize; 8] {
    error!("smc {:#X} {:X?} issued on a host build", cmd, args);
    [!0; 8]
}

#[inline(always)]
pub fn dsb_ish() {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("dsb ish");
    }
    #[cfg(not(target_arch = "aarch64"))]
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

#[inline(always)]
pub fn isb() {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("isb");
    }
}
