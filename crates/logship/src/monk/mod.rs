// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod buffer;
pub mod client;
pub mod producer;

pub use client::{BufferedTransportClient, FailureReason, MonkClientConfig, SendOutcome};
pub use producer::{MonkProducer, ProducerError};
