//! The hello-world call graph as the coordinator would reconstruct it from
//! locally produced parent/child pairs.

use std::sync::Arc;

use an_hello_node::capabilities;
use an_node_sdk::{
    DispatchOptions, DispatchOutcome, Dispatcher, ExecutionContext, ExecutionObserver,
    ExecutionStatus, InboundHeaders,
};
use parking_lot::Mutex;
use serde_json::json;

#[derive(Default)]
struct Recorder {
    finished: Mutex<Vec<ExecutionContext>>,
}

impl ExecutionObserver for Recorder {
    fn on_finish(&self, ctx: &ExecutionContext) {
        self.finished.lock().push(ctx.clone());
    }
}

fn dispatcher(recorder: Arc<Recorder>) -> Dispatcher {
    let options = DispatchOptions {
        enable_async: false,
        ..Default::default()
    };
    let observers: Vec<Arc<dyn ExecutionObserver>> = vec![recorder as Arc<dyn ExecutionObserver>];
    Dispatcher::new(
        Arc::new(capabilities::registry().unwrap()),
        options,
        None,
        observers,
        None,
    )
}

#[tokio::test]
async fn say_hello_builds_a_two_child_tree() {
    let recorder = Arc::new(Recorder::default());
    let d = dispatcher(recorder.clone());

    let (root, result) = match d
        .handle("say_hello", json!({"name": "Alice"}), &InboundHeaders::default())
        .await
    {
        DispatchOutcome::Completed { context, result } => (context, result),
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(result["name"], "Alice");
    assert_eq!(result["emoji"], "👋");
    assert_eq!(
        result["greeting"],
        "Hello, Alice! Welcome to agentnode. 👋"
    );
    assert!(root.is_workflow_root);
    assert!(root.parent_execution_id.is_none());

    let finished = recorder.finished.lock();
    let ids: Vec<_> = finished.iter().map(|c| c.capability_id.as_str()).collect();
    assert_eq!(ids, ["get_greeting", "add_emoji", "say_hello"]);
    for child in &finished[..2] {
        assert_eq!(child.parent_execution_id.as_deref(), Some(root.execution_id.as_str()));
        assert_eq!(child.workflow_id, root.workflow_id);
        assert_eq!(child.status, ExecutionStatus::Succeeded);
    }
}

#[tokio::test]
async fn namespaced_entry_point_nests_one_level_deeper() {
    let recorder = Arc::new(Recorder::default());
    let d = dispatcher(recorder.clone());

    let inbound = InboundHeaders {
        workflow_id: Some("wf-external".into()),
        ..Default::default()
    };
    let out = d.handle("demo_hello", json!({"name": "Bob"}), &inbound).await;
    assert!(matches!(out, DispatchOutcome::Completed { .. }));

    let finished = recorder.finished.lock();
    let by_cap = |id: &str| {
        finished
            .iter()
            .find(|c| c.capability_id == id)
            .cloned()
            .unwrap()
    };
    let demo = by_cap("demo_hello");
    let say = by_cap("say_hello");
    let greet = by_cap("get_greeting");
    assert_eq!(say.parent_execution_id.as_deref(), Some(demo.execution_id.as_str()));
    assert_eq!(greet.parent_execution_id.as_deref(), Some(say.execution_id.as_str()));
    assert!(finished.iter().all(|c| c.workflow_id == "wf-external"));
}

#[tokio::test]
async fn missing_name_is_rejected_before_execution() {
    let recorder = Arc::new(Recorder::default());
    let d = dispatcher(recorder.clone());
    let out = d.handle("say_hello", json!({}), &InboundHeaders::default()).await;
    assert!(matches!(out, DispatchOutcome::Invalid(_)));
    assert!(recorder.finished.lock().is_empty());
}
