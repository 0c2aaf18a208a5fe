use crate::event::Command;
use crate::rmi;

/// Register usage of a command. `arg_num` excludes the function ID,
/// `ret_num` includes the status in x0.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct Constraint {
    pub cmd: Command,
    pub arg_num: usize,
    pub ret_num: usize,
}

impl Constraint {
    pub const fn new(cmd: Command, arg_num: usize, ret_num: usize) -> Constraint {
        Constraint {
            cmd,
            arg_num,
            ret_num,
        }
    }
}

fn pick(cmd: Command) -> Option<Constraint> {
    let constraint = match cmd {
        rmi::VERSION => Constraint::new(rmi::VERSION, 1, 3),
        rmi::GRANULE_DELEGATE => Constraint::new(rmi::GRANULE_DELEGATE, 1, 1),
        rmi::GRANULE_UNDELEGATE => Constraint::new(rmi::GRANULE_UNDELEGATE, 1, 1),
        rmi::DATA_CREATE => Constraint::new(rmi::DATA_CREATE, 5, 1),
        rmi::DATA_CREATE_UNKNOWN => Constraint::new(rmi::DATA_CREATE_UNKNOWN, 3, 1),
        // ret[1] is the PA of the released data granule
        rmi::DATA_DESTROY => Constraint::new(rmi::DATA_DESTROY, 2, 2),
        rmi::REALM_ACTIVATE => Constraint::new(rmi::REALM_ACTIVATE, 1, 1),
        rmi::REALM_CREATE => Constraint::new(rmi::REALM_CREATE, 2, 1),
        rmi::REALM_DESTROY => Constraint::new(rmi::REALM_DESTROY, 1, 1),
        rmi::REC_CREATE => Constraint::new(rmi::REC_CREATE, 3, 1),
        rmi::REC_DESTROY => Constraint::new(rmi::REC_DESTROY, 1, 1),
        rmi::REC_ENTER => Constraint::new(rmi::REC_ENTER, 2, 1),
        rmi::RTT_CREATE => Constraint::new(rmi::RTT_CREATE, 4, 1),
        rmi::RTT_DESTROY => Constraint::new(rmi::RTT_DESTROY, 4, 1),
        rmi::RTT_FOLD => Constraint::new(rmi::RTT_FOLD, 4, 1),
        rmi::RTT_MAP_UNPROTECTED => Constraint::new(rmi::RTT_MAP_UNPROTECTED, 4, 1),
        rmi::RTT_UNMAP_UNPROTECTED => Constraint::new(rmi::RTT_UNMAP_UNPROTECTED, 3, 1),
        rmi::RTT_READ_ENTRY => Constraint::new(rmi::RTT_READ_ENTRY, 3, 5),
        rmi::FEATURES => Constraint::new(rmi::FEATURES, 1, 2),
        rmi::REC_AUX_COUNT => Constraint::new(rmi::REC_AUX_COUNT, 1, 2),
        rmi::RTT_INIT_RIPAS => Constraint::new(rmi::RTT_INIT_RIPAS, 3, 1),
        rmi::RTT_SET_RIPAS => Constraint::new(rmi::RTT_SET_RIPAS, 5, 1),
        _ => return None,
    };
    Some(constraint)
}

pub fn validate<T, G, R>(cmd: Command, ok_func: T, else_func: G) -> R
where
    T: FnOnce(usize, usize) -> R,
    G: FnOnce() -> R,
{
    match pick(cmd) {
        Some(c) => ok_func(c.arg_num, c.ret_num),
        None => else_func(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_command_fits_in_registers() {
        for cmd in rmi::VERSION..=rmi::RTT_SET_RIPAS {
            validate(
                cmd,
                |arg_num, ret_num| {
                    assert!(arg_num <= 6, "{}", rmi::to_str(cmd));
                    assert!((1..=5).contains(&ret_num), "{}", rmi::to_str(cmd));
                },
                || {},
            );
        }
    }

    #[test]
    fn unknown_command() {
        let known = validate(0xc400_0160, |_, _| true, || false);
        assert!(!known);
        assert_eq!(pick(rmi::REC_ENTER), Some(Constraint::new(rmi::REC_ENTER, 2, 1)));
    }
}
