pub mod allocation;
pub mod cache;
pub mod charge_generator;
pub mod documents;
pub mod gateway;
pub mod idempotency;
pub mod scheduler;
pub mod settlement;
