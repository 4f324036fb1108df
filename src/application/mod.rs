pub mod processor;
pub mod scheduler;
pub mod services;

pub use processor::LedgerEventProcessor;
pub use services::LedgerServices;
