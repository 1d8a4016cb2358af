//! Publisher adapters.

mod in_memory;
mod line_publisher;

pub use in_memory::InMemoryPublisher;
pub use line_publisher::LinePublisher;
