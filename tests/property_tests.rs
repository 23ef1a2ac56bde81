//! Property-based tests for apt-batch
//!
//! These tests use the `proptest` crate to generate random inputs and check
//! the parser, the queue and the sentinel correlator against their invariants.

use apt_batch::control::{format_description, parse_stanza, parse_stanzas};
use apt_batch::engine::SentinelCorrelator;
use apt_batch::{OperationBatch, OperationEvent, OperationFlag, OperationQueue, QueueNode};
use proptest::prelude::*;
use std::collections::HashSet;

fn flag() -> impl Strategy<Value = OperationFlag> {
    prop_oneof![
        Just(OperationFlag::Install),
        Just(OperationFlag::Uninstall),
        Just(OperationFlag::Upgrade),
    ]
}

fn package_name() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9.+-]{0,12}"
}

proptest! {
    #[test]
    fn queue_keeps_last_intent_per_name(
        ops in prop::collection::vec(("[a-e]", flag()), 0..40)
    ) {
        let queue = OperationQueue::new();
        for (name, flag) in &ops {
            queue.enqueue(QueueNode::new(name.as_str(), *flag)).unwrap();
        }

        let distinct: HashSet<&String> = ops.iter().map(|(name, _)| name).collect();
        let nodes = queue.snapshot().unwrap();
        prop_assert_eq!(nodes.len(), distinct.len());

        for node in &nodes {
            let last = ops.iter().rev().find(|(name, _)| *name == node.name).map(|(_, flag)| *flag);
            prop_assert_eq!(Some(node.flag), last);
        }
    }

    #[test]
    fn queue_order_is_first_insertion_order(
        names in prop::collection::vec(package_name(), 1..20)
    ) {
        let queue = OperationQueue::new();
        for name in &names {
            queue.enqueue(QueueNode::install(name.as_str())).unwrap();
        }

        let mut expected: Vec<String> = Vec::new();
        for name in names {
            if !expected.contains(&name) {
                expected.push(name);
            }
        }
        let actual: Vec<String> = queue.snapshot().unwrap().into_iter().map(|n| n.name).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn correlator_never_completes_more_than_sentinels_or_nodes(
        node_count in 1usize..10,
        sentinel_count in 0usize..15,
        noise in prop::collection::vec("[A-Za-z :.%]{0,30}", 0..10)
    ) {
        let nodes: Vec<QueueNode> = (0..node_count).map(|i| QueueNode::install(format!("p{}", i))).collect();
        let batch = OperationBatch::new(nodes.clone());
        let mut correlator = SentinelCorrelator::new(&batch, "__BATCH_OP_DONE", false);

        let mut completed = Vec::new();
        for line in &noise {
            completed.extend(correlator.observe(line));
        }
        for _ in 0..sentinel_count {
            completed.extend(correlator.observe("__BATCH_OP_DONE"));
        }

        let expected = sentinel_count.min(node_count);
        prop_assert_eq!(completed.len(), expected);
        for (index, event) in completed.iter().enumerate() {
            match event {
                OperationEvent::Completed { node, position } => {
                    prop_assert_eq!(*position, index);
                    prop_assert_eq!(node, &nodes[index]);
                }
                other => prop_assert!(false, "unexpected event {:?}", other),
            }
        }
        prop_assert_eq!(correlator.unconfirmed().len(), node_count - expected);
    }

    #[test]
    fn format_description_is_idempotent(
        summary in "[a-z][a-z ]{0,20}",
        body in prop::collection::vec(prop_oneof![
            "[A-Za-z][A-Za-z ,]{0,30}".prop_map(|s| format!(" {}", s)),
            Just(" .".to_string()),
            "[a-z]{1,10}".prop_map(|s| format!("  {}", s)),
        ], 0..6)
    ) {
        let raw = std::iter::once(summary).chain(body).collect::<Vec<_>>().join("\n");
        let once = format_description(&raw);
        let twice = format_description(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn stanzas_without_maintainer_are_always_skipped(
        name in "[a-z0-9][a-z0-9.+-]{1,15}",
        version in "[0-9]{1,3}\\.[0-9]{1,3}(-[0-9]{1,2})?"
    ) {
        let stanza = format!("Package: {}\nVersion: {}\nDescription: something\n .", name, version);
        prop_assert!(parse_stanza(&stanza).is_err());

        let outcome = parse_stanzas(&format!("{}\n\n{}", stanza, stanza));
        prop_assert!(outcome.records.is_empty());
        prop_assert_eq!(outcome.skipped.len(), 2);
    }

    #[test]
    fn complete_stanzas_round_trip_required_fields(
        name in "[a-z0-9][a-z0-9.+-]{1,15}",
        version in "[0-9]{1,3}\\.[0-9]{1,3}(-[0-9]{1,2})?",
        section in prop::option::of("[a-z]{3,10}")
    ) {
        let mut stanza = format!(
            "Package: {}\nVersion: {}\nMaintainer: Jane Doe <jane@example.com>\nDescription: a tool\n .",
            name, version
        );
        if let Some(section) = &section {
            stanza.push_str(&format!("\nSection: {}", section));
        }

        let record = parse_stanza(&stanza).unwrap();
        prop_assert_eq!(&record.name, &name);
        prop_assert_eq!(record.version.as_str(), version.as_str());
        prop_assert_eq!(record.section, section);
        prop_assert!(record.homepage.is_none());
    }

    #[test]
    fn invalid_names_never_reach_the_queue(
        name in "[A-Z;|&$` ]{1,10}[a-z]{0,5}"
    ) {
        let queue = OperationQueue::new();
        prop_assert!(queue.enqueue(QueueNode::install(name)).is_err());
        prop_assert!(queue.is_empty().unwrap());
    }
}
