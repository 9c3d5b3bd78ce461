pub mod relay_board;
pub mod relay_protocol;

pub use relay_board::{RelayBoard, MAX_DELAY_SECONDS};
pub use relay_protocol::{RelayCommand, RelayProtocol, RelayRequest, Reply};
