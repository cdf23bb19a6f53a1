#![doc = "testbridge-core: ingestion, normalization and submission of test results."]

//! This crate contains the pipeline that turns test-runner output into a
//! canonical run and submits it to a test-management service.
//! The transport to that service is not part of this crate; it plugs in
//! through [`contract::TestOpsClient`].
//!
//! # Usage
//! Call [`synchronise::synchronise`] for the full pipeline, or use the
//! individual stages ([`ingest`], [`normalize`], [`filter`], [`submission`]).

pub mod config;
pub mod contract;
pub mod error;
pub mod events;
pub mod filter;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod pagination;
pub mod retry;
pub mod submission;
pub mod synchronise;
