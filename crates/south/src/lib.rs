//! South Service
//!
//! A lifecycle controller hosting exactly one device plugin. It registers the
//! service with the management core, drives the plugin's data production
//! (poll or push), forwards readings downstream through a bounded queue and
//! applies configuration changes while running.
//!
//! - [`service`]: the `SouthService` controller and its state machine
//! - [`ingest`]: ingestion coordinator, reading queue and sinks
//! - [`registration`]: core client, retrying registration, inbound notifications
//! - [`management`]: HTTP API the core calls
//! - [`settings`]: layered settings

pub mod ingest;
pub mod management;
pub mod registration;
pub mod service;
pub mod settings;
