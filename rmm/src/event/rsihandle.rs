extern crate alloc;

use super::Context;

use crate::rec::context::set_reg;
use crate::rec::Rec;
use crate::rmi;
use crate::rmi::error::Error;
use crate::rmi::rec::run::Run;
use crate::rsi;
use crate::Monitor;

use alloc::boxed::Box;
use alloc::collections::btree_map::BTreeMap;

pub type Handler = Box<
    dyn Fn(&[usize], &mut [usize], &Monitor, &mut Rec, &mut Run) -> Result<(), Error>
        + Send
        + Sync,
>;

/// RSI command registry.
///
/// A handler leaves `ret[0]` at `rmi::SUCCESS_REC_ENTER` to resume the
/// realm past the SMC, or sets `rmi::SUCCESS` after filling the exit record
/// in `run` to return to the host.
pub struct RsiHandle {
    pub on_event: BTreeMap<usize, Handler>,
}

impl RsiHandle {
    pub fn new() -> Self {
        let mut rsi = Self {
            on_event: BTreeMap::new(),
        };
        rsi.set_event_handlers();
        rsi
    }

    pub fn dispatch(
        &self,
        ctx: &mut Context,
        monitor: &Monitor,
        rec: &mut Rec,
        run: &mut Run,
    ) -> Result<(), Error> {
        match self.on_event.get(&ctx.cmd) {
            Some(handler) => ctx.do_rsi(|arg, ret| handler(arg, ret, monitor, rec, run)),
            None => {
                warn!(
                    "Not registered event: {:X} returning {:X}",
                    ctx.cmd,
                    rsi::SMC_UNKNOWN
                );
                set_reg(rec, 0, rsi::SMC_UNKNOWN)?;
                ctx.init_ret(&[rmi::SUCCESS_REC_ENTER]);
                Ok(())
            }
        }
    }

    fn set_event_handlers(&mut self) {
        rsi::set_event_handler(self);
    }

    pub fn add_event_handler(&mut self, code: usize, handler: Handler) {
        self.on_event.insert(code, handler);
    }
}

impl Default for RsiHandle {
    fn default() -> Self {
        Self::new()
    }
}
