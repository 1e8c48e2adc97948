/*
[INPUT]:  Raw market stream text frames
[OUTPUT]: Classified stream messages (depth update / control reply / other)
[POS]:    WebSocket layer - message parsing and validation
[UPDATE]: When adding new message types or changing format
[UPDATE]: 2026-10-02 Combined-stream envelope + subscription reply classification
*/

use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use crate::types::{DepthUpdateHeader, StreamReply};

const MESSAGE_SAMPLE_LIMIT: usize = 3;
const OTHER_LOG_LIMIT: usize = 3;
const PARSE_FAIL_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static MESSAGE_SAMPLE_COUNT: AtomicUsize = AtomicUsize::new(0);
static OTHER_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static PARSE_FAIL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Depth update with its ordering fields lifted out of the body.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    /// Stream name from the combined-stream envelope, if any
    pub stream: Option<String>,
    pub symbol: String,
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub event_time: i64,
    /// Whole parsed message, forwarded downstream untouched
    pub body: serde_json::Value,
}

/// A classified text frame from the market stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Depth(DepthFrame),
    Reply(StreamReply),
    Other(serde_json::Value),
}

/// Parse a text frame.
///
/// Accepts both the combined-stream envelope `{"stream":..,"data":{..}}` and a bare event object.
pub fn parse_stream_text(text: &str) -> Result<StreamMessage, serde_json::Error> {
    let body: serde_json::Value = match serde_json::from_str(text) {
        Ok(body) => body,
        Err(err) => {
            log_parse_fail_once(&err, text);
            return Err(err);
        }
    };

    if body.get("id").is_some() && (body.get("result").is_some() || body.get("error").is_some()) {
        let reply = StreamReply::deserialize(&body)?;
        return Ok(StreamMessage::Reply(reply));
    }

    let stream = body
        .get("stream")
        .and_then(|value| value.as_str())
        .map(str::to_string);
    let event = match (&stream, body.get("data")) {
        (Some(_), Some(data)) => data,
        _ => &body,
    };

    let is_depth = event
        .get("e")
        .and_then(|value| value.as_str())
        .is_some_and(|value| value == DepthUpdateHeader::EVENT_TYPE);
    if !is_depth {
        log_other_message_once(text);
        return Ok(StreamMessage::Other(body));
    }

    let update = match DepthUpdateHeader::deserialize(event) {
        Ok(update) => update,
        Err(err) => {
            log_parse_fail_once(&err, text);
            return Err(err);
        }
    };
    log_message_sample_once(&update, stream.as_deref());

    Ok(StreamMessage::Depth(DepthFrame {
        stream,
        symbol: update.symbol,
        first_update_id: update.first_update_id,
        final_update_id: update.final_update_id,
        event_time: update.event_time,
        body,
    }))
}

fn log_message_sample_once(update: &DepthUpdateHeader, stream: Option<&str>) {
    let count = MESSAGE_SAMPLE_COUNT.fetch_add(1, Ordering::Relaxed);
    if count >= MESSAGE_SAMPLE_LIMIT {
        return;
    }

    info!(
        sample_index = count + 1,
        sample_limit = MESSAGE_SAMPLE_LIMIT,
        stream = stream.unwrap_or("-"),
        symbol = %update.symbol,
        first_update_id = update.first_update_id,
        final_update_id = update.final_update_id,
        "ws depth sample"
    );
}

fn log_other_message_once(raw: &str) {
    let count = OTHER_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < OTHER_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = OTHER_LOG_LIMIT,
            bytes = raw.len(),
            "ws message event unrecognized"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = OTHER_LOG_LIMIT,
            bytes = raw.len(),
            message = %preview,
            "ws message event unrecognized"
        );
    }
}

fn log_parse_fail_once(err: &serde_json::Error, raw: &str) {
    let count = PARSE_FAIL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < PARSE_FAIL_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            "ws message parse failed"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            message = %preview,
            "ws message parse failed"
        );
    }
}

pub(crate) fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + 3);
    out.push_str(&value[..end]);
    out.push_str("...");
    out
}
