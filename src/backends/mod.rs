//! Segmentation gateway implementations
//!
//! - Command gateway (external segmentation program such as `rembg`)
//! - Mock gateway (deterministic masks for tests and dry runs)

pub mod command;
pub mod mock;

pub use self::command::CommandGateway;
pub use self::mock::{MockGateway, MockMask};
