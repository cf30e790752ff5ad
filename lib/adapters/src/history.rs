//! Bounded conversation-history trimming shared by the model-driven
//! adapters.
//!
//! Histories are trimmed from the oldest end only. A trim must never leave a
//! tool result at the head without the tool call that produced it, so each
//! adapter supplies a predicate identifying records that cannot open a
//! history.

use serde_json::Value as JsonValue;

/// History cap for the cloud adapters.
pub(crate) const CLOUD_HISTORY_CAP: usize = 30;

/// History cap for the self-hosted adapter, whose protocol consumes more
/// records per logical exchange.
pub(crate) const SELF_HOSTED_HISTORY_CAP: usize = 40;

/// Trims `records` to at most `cap` entries, dropping from the front, then
/// keeps dropping while `orphaned_head` flags the leading record.
pub(crate) fn trim_history(
    records: &mut Vec<JsonValue>,
    cap: usize,
    orphaned_head: impl Fn(&JsonValue) -> bool,
) {
    if records.len() > cap {
        let excess = records.len() - cap;
        records.drain(..excess);
    }

    while records.first().is_some_and(&orphaned_head) {
        records.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn is_tool_record(record: &JsonValue) -> bool {
        record["role"] == "tool"
    }

    #[test]
    fn within_cap_is_untouched() {
        let mut records = vec![json!({"role": "user"}), json!({"role": "assistant"})];
        trim_history(&mut records, 30, is_tool_record);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn trims_oldest_first() {
        let mut records: Vec<JsonValue> =
            (0..35).map(|i| json!({"role": "user", "seq": i})).collect();
        trim_history(&mut records, 30, is_tool_record);

        assert_eq!(records.len(), 30);
        assert_eq!(records.first().expect("head")["seq"], 5);
        assert_eq!(records.last().expect("tail")["seq"], 34);
    }

    #[test]
    fn orphaned_tool_results_cannot_open_history() {
        let mut records = vec![
            json!({"role": "assistant", "tool_calls": [{"id": "call_1"}]}),
            json!({"role": "tool", "tool_call_id": "call_1"}),
            json!({"role": "tool", "tool_call_id": "call_2"}),
            json!({"role": "assistant", "content": "done"}),
        ];
        // Cap of 3 would cut between the call and its results.
        trim_history(&mut records, 3, is_tool_record);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["role"], "assistant");
        assert_eq!(records[0]["content"], "done");
    }

    #[test]
    fn paired_call_and_result_survive_together() {
        let mut records = vec![
            json!({"role": "user", "content": "old"}),
            json!({"role": "assistant", "tool_calls": [{"id": "call_1"}]}),
            json!({"role": "tool", "tool_call_id": "call_1"}),
            json!({"role": "assistant", "content": "done"}),
        ];
        trim_history(&mut records, 3, is_tool_record);

        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["role"], "assistant");
        assert!(records[0].get("tool_calls").is_some());
    }
}
