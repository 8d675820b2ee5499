//! Crate-internal scenario tests for the transaction manager
//!
//! Every scenario runs on paused tokio time against `MockFullNode`, so the
//! ledger clock and the loop intervals advance together.
