// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Test servers for integration tests

#![allow(dead_code)]

pub mod mock_scribe;
pub mod mock_tail;

use std::net::TcpListener;

/// Returns a port nothing is listening on.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    listener.local_addr().expect("Failed to get local addr").port()
}
