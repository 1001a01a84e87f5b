//! # Source Module
//!
//! Everything that talks to the upstream SimRail service: payload models,
//! envelope validation, server clock projection and the cached client.

pub mod client;
pub mod envelope;
pub mod models;
pub mod server_time;

pub use client::SimrailClient;
pub use envelope::{parse_envelope, parse_envelope_single, SourceError};
pub use models::{
    Dispatcher, ServerDescriptor, Station, Timetable, TimetableEntry, Train, TrainData, TrainKey,
};
pub use server_time::{delay_seconds, ServerTime};
