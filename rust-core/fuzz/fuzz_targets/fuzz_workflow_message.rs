// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Fuzz target for workflow message decoding.
// Run with: cargo +nightly fuzz run fuzz_workflow_message
//
// Arbitrary bytes are decoded as a workflow event. Anything that decodes
// must re-encode and decode again without panicking.

#![no_main]

use granary_model::{deconstruct_collection_id, from_millis};
use granary_writer::WorkflowMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 16 * 1024 {
        return;
    }
    let Ok(message) = serde_json::from_slice::<WorkflowMessage>(data) else {
        return;
    };

    if let Some(start) = message.context.workflow_start_time {
        let _ = from_millis(start);
    }
    for granule in &message.granules {
        if let Some(collection_id) = granule.payload.collection_id.as_value() {
            let _ = deconstruct_collection_id(collection_id);
        }
    }

    let encoded = serde_json::to_vec(&message).expect("decoded message must re-encode");
    let reparsed: WorkflowMessage =
        serde_json::from_slice(&encoded).expect("re-encoded message must decode");
    assert_eq!(reparsed.granules.len(), message.granules.len());
});
