//! HTTP middleware: error formatting, request ids, request logging

pub mod error;
pub mod logging;
