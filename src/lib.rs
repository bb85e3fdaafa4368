//! Court scheduling and availability engine for a sports-facility booking
//! service. Each club gets an in-memory ledger of courts made durable by a
//! journal, served over the PostgreSQL wire protocol.

pub mod config;
pub mod engine;
pub mod journal;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod schedule;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wire;
