pub mod delivery;
pub mod generation;
pub mod jobs;
pub mod model;
pub mod node;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod telemetry;
pub mod watchdog;
