//! Durable state: order mirror, position snapshot, agent status

pub mod store;

pub use store::PostgresStore;
