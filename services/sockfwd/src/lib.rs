pub mod buffer;
pub mod config;
pub mod control;
pub mod endpoint;
pub mod error;
pub mod forward;
pub mod listener;
pub mod logging;
pub mod stats;

pub use buffer::{BufferPool, PooledBuffer, BUFFER_SIZE};
pub use config::{Config, LogFormat};
pub use control::{
    spawn_signal_listener, ControlCommand, ControlHandler, StatsReport, CONTROL_CHANNEL_CAPACITY,
};
pub use endpoint::{Connection, ConnectionReader, ConnectionWriter, Endpoint, Transport};
pub use error::ForwardError;
pub use forward::Forwarder;
pub use listener::Listener;
pub use stats::{Direction, Stats, StatsSnapshot};
