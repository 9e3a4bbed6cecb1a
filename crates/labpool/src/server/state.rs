use crate::transfer::messages::ServerInfo;
use crate::WrappedRcRefCell;
use zamek::define_wrapped_type;
use zamek::pool::Pool;

pub struct State {
    pool: Pool,
    server_info: ServerInfo,
}

define_wrapped_type!(StateRef, State, pub);

impl State {
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut Pool {
        &mut self.pool
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }
}

impl StateRef {
    pub fn new(server_info: ServerInfo, pool: Pool) -> StateRef {
        Self(WrappedRcRefCell::wrap(State { pool, server_info }))
    }
}
