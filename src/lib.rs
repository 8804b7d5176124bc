pub mod approval;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod lock;
pub mod node;
pub mod scheduler;
pub mod shutdown;
pub mod worker;
