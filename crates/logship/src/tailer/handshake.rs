// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Builds the line sent right after connecting to a tailing endpoint:
/// `<stream>[ <lines>][ <key>=<value>]*\n`.
///
/// A `lines` of zero is the same as not asking for a count.
pub fn construct_conn_msg(
    stream: &str,
    lines: Option<u64>,
    protocol_opts: &[(String, String)],
) -> String {
    let mut message = stream.to_string();
    if let Some(lines) = lines.filter(|lines| *lines > 0) {
        message.push_str(&format!(" {lines}"));
    }
    for (key, value) in protocol_opts {
        message.push_str(&format!(" {key}={value}"));
    }
    message.push('\n');
    message
}
