pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod meta;
pub mod notification;
pub mod scheduler;

pub mod mysql;
pub mod polling;

pub use config::Config;
pub use error::{Error, Result};
pub use event::{ChangeEvent, ChangeListener, ChangeOperation, EventDispatcher, Row};
pub use polling::PollingExtractor;
