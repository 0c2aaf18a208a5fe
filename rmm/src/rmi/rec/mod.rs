pub mod handlers;
pub mod mpidr;
pub mod params;
pub mod run;

pub use self::handlers::set_event_handler;
