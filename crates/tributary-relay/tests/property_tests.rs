//! Property-based tests for aggregation invariants.
//!
//! These tests use proptest to verify that the final document is
//! independent of notification arrival order and duplication.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use proptest::prelude::*;
use tokio_test::block_on;

use tributary_core::storage::{MemoryBackend, ObjectVersion, StorageBackend};
use tributary_relay::aggregate::{AggregateDoc, Aggregator};
use tributary_relay::config::RelayConfig;
use tributary_relay::kind::OutputKind;
use tributary_relay::run_key::RunKey;

const SUFFIXES: [&str; 3] = [".bam", ".bai", ".metrics"];

fn kind(suffix: &str) -> OutputKind {
    OutputKind::new(suffix).unwrap()
}

fn config() -> Arc<RelayConfig> {
    Arc::new(RelayConfig::new("Pipeline", SUFFIXES.map(kind), "output.json").unwrap())
}

fn address(suffix: &str) -> String {
    format!("gs://outputs/Pipeline/run-1/call/sample{suffix}")
}

/// Replays the given arrival order and returns the final document and its
/// version.
fn replay(order: &[&str]) -> (AggregateDoc, ObjectVersion) {
    block_on(async {
        let backend = Arc::new(MemoryBackend::new());
        let aggregator = Aggregator::new(Arc::clone(&backend), config());
        let run = RunKey::from_object_name("Pipeline/run-1/call/sample.bam").unwrap();

        for suffix in order {
            aggregator
                .record_output(&run, &kind(suffix), &address(suffix))
                .await
                .unwrap();
        }

        let object = backend
            .read("Pipeline/run-1/output.json")
            .await
            .unwrap()
            .expect("document should exist");
        (
            AggregateDoc::from_bytes(&object.data).unwrap(),
            object.version,
        )
    })
}

fn expected_doc() -> AggregateDoc {
    let mut doc = AggregateDoc::default();
    for suffix in SUFFIXES {
        doc.record(kind(suffix), address(suffix));
    }
    doc
}

proptest! {
    /// Any arrival permutation converges to the same complete document.
    #[test]
    fn arrival_order_does_not_change_the_final_document(
        order in Just(SUFFIXES.to_vec()).prop_shuffle()
    ) {
        let (doc, version) = replay(&order);
        prop_assert_eq!(doc, expected_doc());
        // One content write per kind.
        prop_assert_eq!(version, ObjectVersion::new("3", "1"));
    }

    /// Redelivering every notification twice, in any order, changes
    /// nothing: duplicates never write.
    #[test]
    fn duplicated_deliveries_do_not_change_the_final_document(
        order in Just([SUFFIXES, SUFFIXES].concat()).prop_shuffle()
    ) {
        let (doc, version) = replay(&order);
        prop_assert_eq!(doc, expected_doc());
        prop_assert_eq!(version, ObjectVersion::new("3", "1"));
    }
}
