pub mod checkpoint;
pub mod config;
pub mod connection_string;
pub mod consumer;
pub mod error;
pub mod event;
pub mod handler;
pub mod kafka;
pub mod metrics;
pub mod metrics_consts;
pub mod partition;
pub mod partition_router;
pub mod partition_worker;
pub mod retry;
pub mod service;
