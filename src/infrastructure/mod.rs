pub mod daemon;
pub mod lock;
pub mod persistence;
pub mod queue;
