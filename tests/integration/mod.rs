//! Integration tests for the Switchyard routing core
//!
//! These exercise the complete dispatch flow: selection, upstream
//! invocation, health bookkeeping, retry, auto-disable and telemetry.

mod dispatch;
mod relay_http;
mod sweeper;
