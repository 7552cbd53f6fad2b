//! Queue task domain entities.

pub mod model;
pub mod status;

pub use model::{NewQueueTask, QueueTask, QueueTaskField, QueueTaskUpdate};
pub use status::QueueTaskStatus;
