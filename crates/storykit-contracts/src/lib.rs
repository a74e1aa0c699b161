//! Data contracts for storykit: the image catalog, prompts, vision-analysis
//! parsing, the model registry, session manifests, receipts and the event log.
//! Nothing in this crate touches the network.

pub mod commands;
pub mod events;
pub mod models;
pub mod runs;
pub mod story;
