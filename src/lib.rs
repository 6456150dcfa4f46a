//! Order service with a transactional outbox.
//!
//! Order changes and the events describing them are committed together;
//! [`outbox::OutboxRelay`] then publishes the events to the broker and
//! deletes them, at least once.

pub mod config;
pub mod domain;
pub mod messaging;
pub mod metrics;
pub mod outbox;
pub mod store;
pub mod utils;
