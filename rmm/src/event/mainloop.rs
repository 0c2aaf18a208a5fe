extern crate alloc;

use super::Context;
use crate::rmi;
use crate::rmi::error::Error;
use crate::Monitor;

use alloc::boxed::Box;
use alloc::collections::btree_map::BTreeMap;

// x1..x6 of an SMC64 call
const MAX_ARGS: usize = 6;

pub type Handler = Box<dyn Fn(&[usize], &mut [usize], &Monitor) -> Result<(), Error> + Send + Sync>;

/// RMI command registry.
///
/// The platform's SMC entry hands every RMI call to `dispatch` and writes
/// the returned registers back to the host.
pub struct Mainloop {
    pub on_event: BTreeMap<usize, Handler>,
}

impl Mainloop {
    pub fn new() -> Self {
        let mut mainloop = Self {
            on_event: BTreeMap::new(),
        };
        mainloop.add_event_handlers();
        mainloop
    }

    fn add_event_handlers(&mut self) {
        rmi::features::set_event_handler(self);
        rmi::gpt::set_event_handler(self);
        rmi::realm::set_event_handler(self);
        rmi::rec::set_event_handler(self);
        rmi::rtt::set_event_handler(self);
        rmi::version::set_event_handler(self);
    }

    /// Runs `cmd` and returns x0..x4 for the host.
    ///
    /// Missing arguments read as zero, surplus ones are ignored.
    pub fn dispatch(&self, monitor: &Monitor, cmd: usize, args: &[usize]) -> [usize; 5] {
        let handler = match self.on_event.get(&cmd) {
            Some(handler) => handler,
            None => {
                error!("Not registered event: {:X}", cmd);
                return [rmi::NOT_SUPPORTED, 0, 0, 0, 0];
            }
        };

        rmi::constraint::validate(
            cmd,
            |arg_num, ret_num| {
                let mut padded = [0usize; MAX_ARGS];
                let len = args.len().min(arg_num);
                padded[..len].copy_from_slice(&args[..len]);

                let mut ctx = Context::new(cmd);
                ctx.init_arg(&padded[..arg_num]);
                ctx.resize_ret(ret_num);
                ctx.do_rmi(|arg, ret| handler(arg, ret, monitor))
            },
            || {
                error!("No constraint for {}", rmi::to_str(cmd));
                [rmi::NOT_SUPPORTED, 0, 0, 0, 0]
            },
        )
    }

    pub fn add_event_handler(&mut self, code: usize, handler: Handler) {
        self.on_event.insert(code, handler);
    }
}

impl Default for Mainloop {
    fn default() -> Self {
        Self::new()
    }
}
