pub mod controller;
pub mod extract;
pub mod job;
pub mod navigator;
pub mod record;
pub mod strategy;

#[cfg(test)]
pub mod testing;

// Re-export common types
pub use controller::{Acknowledgement, CrawlerController, JobHandle};
pub use job::{Job, JobRequest, Rejection};
pub use navigator::{NavigationError, Navigator};
pub use record::{Content, ResultRecord};
pub use strategy::{resolve, Strategy};
