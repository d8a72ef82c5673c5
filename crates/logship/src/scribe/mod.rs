// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod client;
pub mod codec;
pub mod connection;

pub use client::{PrimaryTransportClient, ScribeClientConfig};
pub use connection::{ScribeConnection, TcpScribeConnection};
