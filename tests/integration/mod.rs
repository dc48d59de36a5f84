//! Integration tests against the public API

mod diagnostics_test;
mod http_remote_test;
mod store_test;
mod sync_test;
