pub mod mainloop;
pub mod realmexit;
pub mod rsihandle;

pub use crate::rmi::error::Error;
pub use crate::{rmi, rsi};
pub use mainloop::Mainloop;
pub use rsihandle::RsiHandle;

extern crate alloc;
use alloc::vec::Vec;

#[macro_export]
macro_rules! listen {
    ($eventloop:expr, $code:expr, $handler:expr) => {{
        $eventloop.add_event_handler($code.into(), alloc::boxed::Box::new($handler))
    }};
}

pub type Command = usize;

#[derive(Clone, Debug)]
pub struct Context {
    pub cmd: Command,
    pub arg: Vec<usize>,
    pub ret: Vec<usize>,
}

impl Context {
    pub fn new(cmd: Command) -> Context {
        Context {
            cmd,
            arg: Vec::new(),
            ret: Vec::new(),
        }
    }

    pub fn init_arg(&mut self, arg: &[usize]) {
        self.arg.clear();
        self.arg.extend_from_slice(arg);
    }

    pub fn init_ret(&mut self, ret: &[usize]) {
        self.ret.clear();
        self.ret.extend_from_slice(ret);
    }

    pub fn resize_ret(&mut self, new_len: usize) {
        self.ret.clear();
        self.ret.resize(new_len, 0);
    }

    pub fn ret_slice(&self) -> &[usize] {
        &self.ret[..]
    }

    pub fn cmd(&self) -> Command {
        self.cmd
    }

    /// Runs an RMI handler and packs its outcome into the return registers.
    pub fn do_rmi<F>(&mut self, handler: F) -> [usize; 5]
    where
        F: Fn(&[usize], &mut [usize]) -> Result<(), Error>,
    {
        let mut result = [0; 5];
        self.ret[0] = rmi::SUCCESS;

        if let Err(code) = handler(&self.arg[..], &mut self.ret[..]) {
            self.ret[0] = code.into();
        }

        trace!(
            "RMI: {0: <20} {1:X?} > {2:X?}",
            rmi::to_str(self.cmd),
            &self.arg,
            &self.ret
        );

        let ret_len = self.ret.len().min(result.len());
        result[..ret_len].copy_from_slice(&self.ret[..ret_len]);
        result
    }

    /// Runs an RSI handler. `ret[0]` tells the caller whether to resume the
    /// realm (`rmi::SUCCESS_REC_ENTER`) or to return to the host.
    pub fn do_rsi<F>(&mut self, mut handler: F) -> Result<(), Error>
    where
        F: FnMut(&[usize], &mut [usize]) -> Result<(), Error>,
    {
        self.ret[0] = rmi::SUCCESS_REC_ENTER;

        let res = handler(&self.arg[..], &mut self.ret[..]);
        if let Err(code) = res {
            error!("rsi handler returns error:{:?}", code);
        }

        trace!(
            "RSI: {0: <20} {1:X?} > {2:X?}",
            rsi::to_str(self.cmd),
            &self.arg,
            &self.ret
        );
        res
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::new(0)
    }
}
