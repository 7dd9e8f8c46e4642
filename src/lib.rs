pub mod core {
    pub mod config;
    pub mod error;
    pub mod routes;
    pub mod startup;
    pub mod state;
    pub mod tracing_init;
}

pub mod controller {
    pub mod handle;
    pub mod priority;
    pub mod release;
    pub mod router;
    pub mod session;
}

pub mod engine {
    pub mod adapter;
    pub mod local;
    #[cfg(test)]
    pub mod mock;

    pub use adapter::*;
}

pub mod handlers {
    pub mod command;
    pub mod events;
    pub mod fallback;
    pub mod health;
}

pub mod models {
    pub mod api;
    pub mod command;
    pub mod event;
    pub mod transfer;
}

pub mod status {
    pub mod bus;
    pub mod coalescer;
    pub mod poller;
}

pub mod stores {
    pub mod media_store;
}
