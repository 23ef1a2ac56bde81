//! Batch execution through real `sh` processes

use super::{local_settings, MockQueryRunner};
use apt_batch::configuration::SettingsBuilder;
use apt_batch::{
    Elevation, OperationEvent, OperationQueue, PackageMetadataService, PrivilegedExecutionEngine,
    QueueNode, Session,
};
use futures::StreamExt;

fn session_with(tool: &str, runner: MockQueryRunner) -> Session<MockQueryRunner> {
    let settings = local_settings(tool);
    Session::new(
        OperationQueue::new(),
        PrivilegedExecutionEngine::new(settings.clone()),
        PackageMetadataService::new(runner, &settings),
    )
}

#[tokio::test]
async fn test_completions_follow_batch_order_for_many_nodes() {
    let session = session_with("echo", MockQueryRunner::new());
    let names: Vec<String> = (0..20).map(|i| format!("pkg{}", i)).collect();
    for name in &names {
        session.queue().enqueue(QueueNode::install(name.as_str())).unwrap();
    }

    let mut positions = Vec::new();
    let report = session
        .commit_with(|event| {
            if let OperationEvent::Completed { position, .. } = event {
                positions.push(*position);
            }
        })
        .await
        .unwrap();

    assert_eq!(positions, (0..20).collect::<Vec<_>>());
    let confirmed: Vec<String> = report.confirmed.iter().map(|n| n.name.clone()).collect();
    assert_eq!(confirmed, names);
    assert!(session.queue().is_empty().unwrap());
}

#[tokio::test]
async fn test_completion_invalidates_cached_status() {
    let runner = MockQueryRunner::new().with_output("dpkg-query -W htop", "");
    let session = session_with("echo", runner.clone());

    assert!(!session.metadata().status("htop").await);
    session.queue().enqueue(QueueNode::install("htop")).unwrap();
    session.commit().await.unwrap();
    assert!(!session.metadata().status("htop").await);

    let status_queries = runner
        .calls()
        .iter()
        .filter(|call| call.starts_with("dpkg-query"))
        .count();
    assert_eq!(status_queries, 2);
}

#[tokio::test]
async fn test_tagged_markers_confirm_by_name() {
    let settings = SettingsBuilder::default()
        .tool("echo")
        .elevation(Elevation::None)
        .tag_markers(true)
        .build()
        .unwrap();
    let engine = PrivilegedExecutionEngine::new(settings);
    let queue = OperationQueue::new();
    queue.enqueue(QueueNode::install("a")).unwrap();
    queue.enqueue(QueueNode::upgrade("b", Some("1.2-3".to_string()))).unwrap();
    let batch = queue.commit().unwrap();

    assert!(engine.script(&batch).as_str().contains("echo __BATCH_OP_DONE b"));

    let events: Vec<OperationEvent> = engine.execute(&batch).unwrap().collect().await;
    let completed: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            OperationEvent::Completed { node, .. } => Some(node.name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec!["a", "b"]);
}

#[tokio::test]
async fn test_fewer_sentinels_mean_fewer_completions() {
    // The second fragment's tool kills the shell before its sentinel is echoed.
    let session = session_with(
        r#"g() { [ "$3" != b ] || kill -9 $$; }; g"#,
        MockQueryRunner::new(),
    );
    for name in ["a", "b", "c"] {
        session.queue().enqueue(QueueNode::install(name)).unwrap();
    }

    let report = session.commit().await.unwrap();

    assert_eq!(report.confirmed, vec![QueueNode::install("a")]);
    assert_eq!(
        report.unconfirmed,
        vec![QueueNode::install("b"), QueueNode::install("c")]
    );
    assert_eq!(report.exit_code, None);
    assert!(!report.success);
    assert_eq!(session.queue().len().unwrap(), 2);
    assert!(!session.queue().is_busy().unwrap());
}

#[tokio::test]
async fn test_spawn_error_leaves_queue_idle_and_intact() {
    let settings = SettingsBuilder::default()
        .tool("echo")
        .elevation(Elevation::Pkexec)
        .build()
        .unwrap();
    if which::which("pkexec").is_ok() {
        // Only meaningful where the elevation helper is absent.
        return;
    }
    let session = Session::new(
        OperationQueue::new(),
        PrivilegedExecutionEngine::new(settings.clone()),
        PackageMetadataService::new(MockQueryRunner::new(), &settings),
    );
    session.queue().enqueue(QueueNode::install("htop")).unwrap();

    let err = session.commit().await.unwrap_err();
    assert_eq!(err.category(), "spawn");
    assert_eq!(session.queue().len().unwrap(), 1);
    assert!(!session.queue().is_busy().unwrap());
}
