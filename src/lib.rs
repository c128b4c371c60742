//! Multi-pool, multi-device proof-of-work mining coordinator core.
//!
//! The pipeline is a producer/consumer network: Work Fetcher → Stage Arbiter
//! → Work Queue → Hasher Pool → Submit Worker, with a Long-Poll Listener
//! feeding the Stage Arbiter directly and a Watchdog supervising liveness
//! and pool rotation. See each module for its piece of the design.

pub mod arbiter;
pub mod config;
pub mod console;
pub mod controller;
pub mod core;
pub mod error;
pub mod fetcher;
pub mod hasher;
pub mod longpoll;
pub mod pool;
pub mod queue;
pub mod rpc;
pub mod schedule;
pub mod submit;
pub mod watchdog;
