pub mod sysreg;
pub mod trap;
