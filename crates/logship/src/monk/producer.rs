// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProducerError {
    #[error("Monk took too long to respond")]
    Timeout,
    #[error("stream {0} not found")]
    StreamNotFound(String),
    #[error("{0}")]
    Other(String),
}

/// Client of the best-effort Monk backend.
pub trait MonkProducer: Send {
    fn send_messages(
        &mut self,
        stream: &str,
        messages: &[&[u8]],
        key: Option<&[u8]>,
    ) -> Result<(), ProducerError>;

    fn close(&mut self) -> Result<(), ProducerError>;
}
