//! Test suite for gigsync
//!
//! This module organizes all tests

pub mod integration;
