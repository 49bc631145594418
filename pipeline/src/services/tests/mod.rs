//! Tests for pipeline services

pub mod publisher;
