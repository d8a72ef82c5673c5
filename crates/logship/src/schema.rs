// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Registration of Monk streams with the schema registry.
//!
//! Log streams carry opaque lines, so every stream is registered against the
//! same single-field placeholder schema.

use crate::record::scribify;
use serde::Serialize;
use serde_json::{json, Value};

pub const SCRIBE_LOG_NAMESPACE: &str = "scribe_log";
const SOURCE_OWNER_EMAIL: &str = "notavailable@yelp.com";
const CLUSTER_TYPE: &str = "scribe";
const STREAM_POLICY: &str = "best_effort";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("schema registration failed: {0}")]
pub struct RegistrationError(pub String);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaRegistration {
    pub namespace: String,
    pub source: String,
    pub schema_json: Value,
    pub source_owner_email: String,
    pub contains_pii: bool,
    pub cluster_type: String,
    pub stream_policy: String,
}

impl SchemaRegistration {
    pub fn for_stream(stream: &str) -> Self {
        let source = scribify(stream).into_owned();
        SchemaRegistration {
            namespace: SCRIBE_LOG_NAMESPACE.to_string(),
            schema_json: placeholder_schema(&source),
            source,
            source_owner_email: SOURCE_OWNER_EMAIL.to_string(),
            contains_pii: false,
            cluster_type: CLUSTER_TYPE.to_string(),
            stream_policy: STREAM_POLICY.to_string(),
        }
    }
}

fn placeholder_schema(stream: &str) -> Value {
    json!({
        "type": "record",
        "namespace": SCRIBE_LOG_NAMESPACE,
        "name": stream,
        "doc": "This schema is not used to actually serialize or deserialize messages, \
                but stream will be assigned to this schema.",
        "fields": [
            {"type": "string", "name": "log_line", "doc": "log line string"}
        ]
    })
}

pub trait SchemaRegistry: Send + Sync {
    fn register_schema_from_schema_json(
        &self,
        registration: &SchemaRegistration,
    ) -> Result<(), RegistrationError>;
}
