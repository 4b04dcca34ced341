//! HTTP request handlers for the worker's liveness surface.

/// Health and scheduler status endpoint
pub mod health;
