// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

pub mod arena;
pub mod ask;
pub mod attest;
pub mod ci;
pub mod ledger;
pub mod memory;
pub mod replay;
pub mod session;
