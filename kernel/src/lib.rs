// Dropsweep Kernel
//
// Drop detection and deletion planning for a versioned table catalog:
// find tables dropped within a lookback window and remove what they
// left behind in object storage.

pub mod adapters;
pub mod cleanup;
pub mod config;
pub mod drops;
pub mod execute;
pub mod history;
pub mod plan;
pub mod resolve;
