// plexkit-fimp: FIMP message model and bus transport contracts.

pub mod address;
pub mod error;
pub mod memory;
pub mod message;
pub mod transport;
pub mod value;

pub use address::Address;
pub use error::Error;
pub use memory::MemoryTransport;
pub use message::{FimpMessage, Message, EVT_ERROR_REPORT};
pub use transport::{topic_matches, Publisher, Transport};
pub use value::{Value, ValueType};
