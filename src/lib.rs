pub mod config;
pub mod eye;
pub mod messages;
pub mod mode;
pub mod rig;
pub mod runtime;
pub mod scheduler;
pub mod sequence;
pub mod servo;
pub mod store;
