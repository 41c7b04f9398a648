//! formtrace daemon: aggregates browser form-visit telemetry per session.
//!
//! The browser client posts small JSON events (session open, window resize,
//! copy/paste, form submit) as the visitor interacts with a page. Each event is
//! validated on its own and merged into one in-memory record per
//! (website, session) pair.
//!
//! - [`store`] owns every record and serializes updates per session
//! - [`ingest`] validates events and applies them to the store
//! - [`report`] renders record changes for operators
//! - [`server`] exposes the HTTP endpoints the client talks to

pub mod config;
pub mod digest;
pub mod error;
pub mod ingest;
pub mod report;
pub mod server;
pub mod store;
