pub mod external;
pub mod reference;
pub mod registry;
pub mod tracker;

pub use external::ExternalTool;
pub use reference::resolve_tools;
pub use registry::ToolRegistry;
pub use tracker::ToolCallTracker;
