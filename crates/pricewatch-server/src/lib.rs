//! HTTP front end over the extraction runtime, plus the periodic check
//! cycle driver. The binary wires the Chromium runtime into the generic
//! state; tests run the same router against mocks.

pub mod config;
pub mod dto;
pub mod error;
pub mod routes;
pub mod state;
