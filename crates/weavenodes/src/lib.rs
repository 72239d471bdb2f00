//! Standard node library
//!
//! Collection of built-in nodes for common operations

mod debug;
mod time;
mod transform;

pub use debug::DebugNode;
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode};

use weaveruntime::NodeRegistry;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register("debug.log", DebugNode, &["message"], None);
    registry.register("time.delay", DelayNode::default(), &["delay_ms"], None);
    registry.register("transform.json_parse", JsonParseNode, &["json"], Some("parsed"));
    registry.register("transform.json_stringify", JsonStringifyNode, &["value"], Some("json"));
}
