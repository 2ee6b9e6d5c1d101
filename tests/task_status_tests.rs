
use dispatcher_lite::error::DispatcherError;
use dispatcher_lite::store::Store;
use dispatcher_lite::types::{Node, NodeStatus, Task, TaskStatus};
use test_harness::{test_dispatcher, TestStore};

async fn setup() -> (
    std::sync::Arc<TestStore>,
    std::sync::Arc<dispatcher_lite::dispatcher::Dispatcher>,
) {
    let store = TestStore::new();
    let dispatcher = test_dispatcher(store.clone());
    dispatcher.register(Node::new("A")).await.unwrap();
    store.create_task(Task::new("t1", "A")).await.unwrap();
    store.create_task(Task::new("t2", "B")).await.unwrap();
    (store, dispatcher)
}

#[tokio::test]
async fn test_update_task_status_persists() {
    let (store, dispatcher) = setup().await;

    let task = dispatcher
        .update_task_status("A", "t1", TaskStatus::Running, None)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Running);

    let task = dispatcher
        .update_task_status("A", "t1", TaskStatus::Failed, Some("exit 1".to_string()))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Failed);

    let stored = store.get_task("t1").await.unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.message.as_deref(), Some("exit 1"));
    assert_eq!(stored.version, 3);
}

#[tokio::test]
async fn test_status_from_unregistered_node_rejected() {
    let (store, dispatcher) = setup().await;

    let result = dispatcher
        .update_task_status("B", "t2", TaskStatus::Running, None)
        .await;
    assert!(matches!(result, Err(DispatcherError::NotRegistered(id)) if id == "B"));
    assert_eq!(
        store.get_task("t2").await.unwrap().status,
        TaskStatus::Pending
    );
}

#[tokio::test]
async fn test_status_after_node_down_rejected() {
    let (store, dispatcher) = setup().await;
    dispatcher
        .update_node_status("A", NodeStatus::Down)
        .await
        .unwrap();

    let result = dispatcher
        .update_task_status("A", "t1", TaskStatus::Completed, None)
        .await;
    assert!(matches!(result, Err(DispatcherError::NotRegistered(_))));
    assert_eq!(
        store.get_task("t1").await.unwrap().status,
        TaskStatus::Pending
    );
}

#[tokio::test]
async fn test_status_for_unknown_task() {
    let (_store, dispatcher) = setup().await;

    let result = dispatcher
        .update_task_status("A", "missing", TaskStatus::Running, None)
        .await;
    assert!(matches!(result, Err(DispatcherError::TaskNotFound(id)) if id == "missing"));
}

#[tokio::test]
async fn test_status_for_task_of_another_node() {
    let (store, dispatcher) = setup().await;

    let result = dispatcher
        .update_task_status("A", "t2", TaskStatus::Running, None)
        .await;
    assert!(matches!(
        result,
        Err(DispatcherError::TaskNotAssigned { ref task_id, ref node_id })
            if task_id == "t2" && node_id == "A"
    ));
    assert_eq!(
        store.get_task("t2").await.unwrap().status,
        TaskStatus::Pending
    );
}

#[tokio::test]
async fn test_terminal_status_is_final() {
    let (_store, dispatcher) = setup().await;
    dispatcher
        .update_task_status("A", "t1", TaskStatus::Completed, None)
        .await
        .unwrap();

    // Duplicate report is accepted without a write
    let task = dispatcher
        .update_task_status("A", "t1", TaskStatus::Completed, None)
        .await
        .unwrap();
    assert_eq!(task.version, 2);

    let result = dispatcher
        .update_task_status("A", "t1", TaskStatus::Running, None)
        .await;
    assert!(matches!(result, Err(DispatcherError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_store_failure_propagates() {
    let (store, dispatcher) = setup().await;
    store.fail_task_updates(true);

    let result = dispatcher
        .update_task_status("A", "t1", TaskStatus::Running, None)
        .await;
    assert!(matches!(result, Err(DispatcherError::Store(_))));
    // Registration is unaffected
    assert!(dispatcher.is_registered("A"));
}
