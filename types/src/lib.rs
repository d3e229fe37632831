pub mod audio;
pub mod events;
pub mod tools;

pub use audio::{InboundFrame, OutboundFrame};
pub use events::{ClientEvent, ServerEvent, Speaker};
pub use tools::{ToolCallRequest, ToolSchema};
