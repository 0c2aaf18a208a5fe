pub mod mm;
pub mod rd;
pub mod vmid;
