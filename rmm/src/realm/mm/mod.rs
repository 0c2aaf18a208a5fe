pub mod rtt;
pub mod stage2_translation;
pub mod stage2_tte;
