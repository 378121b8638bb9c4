pub mod codec;
pub mod poller;
pub mod transport;

pub use poller::{DevicePoller, Parameter};
pub use transport::{BluerTransport, Transport};
