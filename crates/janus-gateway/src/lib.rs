pub mod connection;
pub mod counter;
pub mod dispatcher;
pub mod flow;

pub use counter::{EventCounter, LedgerEntry};
pub use dispatcher::Dispatcher;
pub use flow::{FlowConfig, RealtimeFlow};
