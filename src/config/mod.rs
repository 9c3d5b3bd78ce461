pub mod settings;

pub use settings::{BoardConfig, Dialect, ParityConfig, MAX_SLAVE_ADDRESS};
