//! `mailpipe`: compose JSON-described email requests into RFC 822
//! messages and dispatch them through a mail transport.
//!
//! The crate is split into two independently invoked stages: the
//! [`compose::Composer`], which turns a stored request into a `.eml`
//! object idempotently, and the [`dispatch::Dispatcher`], which submits
//! a composed object within a deadline.

pub mod compose;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod parser;
pub mod store;
