//! ems-core
//!
//! Background notifications for the event management system: invitation
//! emails, event reminders and reminder emails, run through a task broker.
//!
//! # Modules
//! - **domain**: ids, task types, queue options, broker states, errors
//! - **ports**: repositories, mail transport, clock, id generator
//! - **queue**: broker trait, in-memory broker, queue client, retry delays
//! - **typed**: payload types, handlers and the router
//! - **app**: the dispatch server and its builder
//! - **worker**: in-process worker pool and timers
//! - **service**: notification scheduling, handlers, direct mail
//! - **impls**: store and mail transport adapters
//! - **config**: environment configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod service;
pub mod typed;
pub mod worker;
