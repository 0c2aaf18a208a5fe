extern crate alloc;

use crate::event::Command;
use crate::rmi::constraint::Constraint;
use crate::rsi;
use alloc::collections::btree_map::BTreeMap;

lazy_static! {
    static ref CONSTRAINTS: BTreeMap<Command, Constraint> = {
        let mut m = BTreeMap::new();
        m.insert(rsi::SMCCC_VERSION, Constraint::new(rsi::SMCCC_VERSION, 0, 1));
        m.insert(rsi::VERSION, Constraint::new(rsi::VERSION, 0, 1));
        m.insert(
            rsi::MEASUREMENT_READ,
            Constraint::new(rsi::MEASUREMENT_READ, 1, 9),
        );
        m.insert(
            rsi::MEASUREMENT_EXTEND,
            Constraint::new(rsi::MEASUREMENT_EXTEND, 10, 1),
        );
        m.insert(
            rsi::ATTEST_TOKEN_INIT,
            Constraint::new(rsi::ATTEST_TOKEN_INIT, 8, 2),
        );
        m.insert(
            rsi::ATTEST_TOKEN_CONTINUE,
            Constraint::new(rsi::ATTEST_TOKEN_CONTINUE, 1, 2),
        );
        m.insert(rsi::REALM_CONFIG, Constraint::new(rsi::REALM_CONFIG, 1, 1));
        m.insert(
            rsi::IPA_STATE_SET,
            Constraint::new(rsi::IPA_STATE_SET, 3, 1),
        );
        m.insert(
            rsi::IPA_STATE_GET,
            Constraint::new(rsi::IPA_STATE_GET, 1, 2),
        );
        m.insert(rsi::HOST_CALL, Constraint::new(rsi::HOST_CALL, 1, 1));
        m.insert(rsi::DEV_MEM, Constraint::new(rsi::DEV_MEM, 3, 1));
        m
    };
}

/// Register usage of an RSI call. Results go straight into the REC's
/// registers, so `ret_num` only documents them; the context carries the
/// resume-or-exit decision in its single return slot.
pub fn validate<T>(cmd: Command, mut ok_func: T)
where
    T: FnMut(usize, usize),
{
    if let Some(c) = CONSTRAINTS.get(&cmd) {
        ok_func(c.arg_num, c.ret_num);
    } else {
        // rsi.dispatch takes care of unregistered command.
        ok_func(0, 1);
    }
}
