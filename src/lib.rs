//! Retrieval core for protein annotation services.
//!
//! A [`context::Gator`] owns the shared machinery (event bus, request
//! scheduler, result cache, HTTP transport). [`reader::Reader`] values
//! describe individual data sources and [`service::Service`] drives one
//! retrieval at a time through cache, scheduler, transport and
//! [`assembler::ResultAssembler`].

pub mod app;
pub mod assembler;
pub mod cache;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod events;
pub mod output;
pub mod reader;
pub mod scheduler;
pub mod service;
pub mod transport;
