//! Shiksha relay - event-driven integration layer.
//!
//! Services publish domain events to partitioned topics through the
//! [`bus::BrokerClient`]; side-effect [`consumers`] keep enrollments, caches,
//! notifications and content processing consistent. The [`ingest`] pipeline
//! turns uploads into jobs for out-of-process workers, and the
//! [`lifecycle::ResourceRegistry`] drains every connection on shutdown.

pub mod blob;
pub mod bus;
pub mod cache;
pub mod config;
pub mod consumers;
pub mod documents;
pub mod events;
pub mod index;
pub mod ingest;
pub mod lifecycle;
pub mod notify;
pub mod runtime;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
