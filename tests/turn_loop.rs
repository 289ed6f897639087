mod support;

use glass_loop::{Agent, AgentError, DenyAll, Environment, Item, ToolSchema};
use serde_json::json;
use std::sync::Arc;
use support::*;

#[tokio::test]
async fn assistant_message_ends_turn_after_one_round_trip() {
    let service = ScriptedService::new(vec![response(vec![assistant("done")])]);
    let agent = Agent::new(FakeSurface::desktop(), service.clone(), DenyAll, quiet());

    let out = agent.run_turn(&[], None, None).await.unwrap();

    assert_eq!(out.len(), 1);
    assert!(out[0].is_assistant_message());
    assert_eq!(service.requests().len(), 1);
    assert!(!agent.computer().touched());
}

#[tokio::test]
async fn action_ceiling_caps_round_trips_and_appends_marker() {
    let service = ScriptedService::repeating(response(vec![click_call("call_1", 10, 20)]));
    let logger = Arc::new(RecordingLogger::default());
    let (gate, seen) = recording_gate(true);
    let agent = Agent::new(FakeSurface::desktop(), service.clone(), gate, quiet()).with_logger(logger.clone());

    let out = agent
        .run_turn(&[Item::user("keep clicking")], Some("p1"), Some(2))
        .await
        .unwrap();

    assert_eq!(service.requests().len(), 2);
    assert_eq!(
        out.iter().map(Item::kind).collect::<Vec<_>>(),
        vec!["computer_call", "computer_call_output", "computer_call", "computer_call_output", "max-actions"]
    );
    assert!(matches!(out.last(), Some(Item::ActionLimitReached { .. })));
    assert_eq!(agent.computer().call_names(), vec!["click", "click"]);
    assert!(seen.lock().unwrap().is_empty(), "no checks, no gate");

    // the marker is logged like any assistant message
    assert_eq!(logger.kinds(), vec!["computer_call", "computer_call", "max-actions"]);
    let marker = logger.records().pop().unwrap();
    assert_eq!(marker.prompt_id.as_deref(), Some("p1"));
    assert!(marker.content.unwrap().text().contains("maximum of 2 actions"));

    // second request replays the first round-trip, minus nothing
    let second = &service.requests()[1];
    assert_eq!(second.input.len(), 3);
    assert_eq!(second.input[2].kind(), "computer_call_output");
}

#[tokio::test]
async fn zero_ceiling_never_calls_the_service() {
    let service = ScriptedService::new(vec![]);
    let agent = Agent::new(FakeSurface::desktop(), service.clone(), DenyAll, quiet());

    let out = agent.run_turn(&[Item::user("hi")], None, Some(0)).await.unwrap();

    assert!(service.requests().is_empty());
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].kind(), "max-actions");
}

#[tokio::test]
async fn ceiling_counts_round_trips_not_actions() {
    let service = ScriptedService::repeating(response(vec![click_call("a", 1, 1), click_call("b", 2, 2)]));
    let agent = Agent::new(FakeSurface::desktop(), service.clone(), DenyAll, quiet());

    let out = agent.run_turn(&[], None, Some(1)).await.unwrap();

    assert_eq!(service.requests().len(), 1);
    assert_eq!(agent.computer().call_names().len(), 2);
    // both calls first, then both outputs, then the marker
    assert_eq!(
        out.iter().map(Item::kind).collect::<Vec<_>>(),
        vec!["computer_call", "computer_call", "computer_call_output", "computer_call_output", "max-actions"]
    );
}

#[tokio::test]
async fn keeps_going_until_an_assistant_message() {
    let service = ScriptedService::new(vec![
        response(vec![json!({"type": "reasoning", "id": "rs_1", "summary": []}), click_call("c1", 5, 5)]),
        response(vec![click_call("c2", 6, 6)]),
        response(vec![assistant("all set")]),
    ]);
    let agent = Agent::new(FakeSurface::desktop(), service.clone(), DenyAll, quiet());

    let out = agent.run_turn(&[Item::user("do it")], None, None).await.unwrap();

    assert_eq!(service.requests().len(), 3);
    assert_eq!(out.len(), 6);
    assert!(out.last().unwrap().is_assistant_message());
}

#[tokio::test]
async fn declined_safety_check_aborts_before_output() {
    let service = ScriptedService::new(vec![response(vec![checked_call(
        "call_9",
        json!({"type": "click", "x": 10, "y": 20}),
        &["Page is asking for your password"],
    )])]);
    let logger = Arc::new(RecordingLogger::default());
    let (gate, seen) = recording_gate(false);
    let agent = Agent::new(FakeSurface::desktop(), service, gate, quiet()).with_logger(logger.clone());

    let err = agent.run_turn(&[Item::user("log in")], None, None).await.unwrap_err();

    assert!(matches!(err, AgentError::SafetyCheckDeclined(ref m) if m == "Page is asking for your password"));
    assert!(err.to_string().contains("Page is asking for your password"));
    assert_eq!(*seen.lock().unwrap(), vec!["Page is asking for your password"]);
    assert!(logger.records().is_empty(), "nothing committed for the declined call");
}

#[tokio::test]
async fn acknowledged_checks_are_echoed_in_order() {
    let service = ScriptedService::new(vec![
        response(vec![checked_call(
            "call_1",
            json!({"type": "type", "text": "hunter2"}),
            &["first", "second"],
        )]),
        response(vec![assistant("typed")]),
    ]);
    let (gate, seen) = recording_gate(true);
    let agent = Agent::new(FakeSurface::desktop(), service, gate, quiet());

    let out = agent.run_turn(&[], None, None).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    match &out[1] {
        Item::ComputerCallOutput { call_id, acknowledged_safety_checks, .. } => {
            assert_eq!(call_id, "call_1");
            let messages: Vec<_> = acknowledged_safety_checks.iter().map(|c| c.message.as_str()).collect();
            assert_eq!(messages, vec!["first", "second"]);
            assert_eq!(acknowledged_safety_checks[0].id.as_deref(), Some("sc_0"));
        }
        other => panic!("expected computer_call_output, got {other:?}"),
    }
    assert_eq!(agent.computer().calls()[0].1.get("text"), Some(&json!("hunter2")));
}

#[tokio::test]
async fn missing_output_is_fatal() {
    let service = ScriptedService::new(vec![json!({"id": "resp_x", "error": {"message": "overloaded"}})]);
    let agent = Agent::new(FakeSurface::desktop(), service, DenyAll, quiet());

    let err = agent.run_turn(&[Item::user("hi")], None, Some(5)).await.unwrap_err();

    assert!(matches!(err, AgentError::MissingOutput(ref reason) if reason.contains("overloaded")));
    assert!(err.to_string().contains("overloaded"));
}

#[tokio::test]
async fn unrecognized_items_are_replayed_verbatim() {
    let reasoning = json!({"type": "reasoning", "id": "rs_1", "summary": [], "encrypted_content": "gAAAA"});
    let search = json!({
        "type": "web_search_call",
        "id": "ws_1",
        "status": "completed",
        "action": {"type": "search", "query": "weather"}
    });
    let service = ScriptedService::new(vec![
        response(vec![reasoning.clone(), search.clone(), click_call("c1", 3, 4)]),
        response(vec![assistant("sunny")]),
    ]);
    let agent = Agent::new(FakeSurface::desktop(), service.clone(), DenyAll, quiet());

    agent.run_turn(&[Item::user("weather?")], None, None).await.unwrap();

    let second = serde_json::to_value(&service.requests()[1].input).unwrap();
    assert_eq!(second[1], reasoning);
    assert_eq!(second[2], search);
    assert_eq!(second[4]["type"], "computer_call_output");
}

#[tokio::test]
async fn default_agent_declines_safety_checks() {
    let service = ScriptedService::new(vec![response(vec![checked_call(
        "call_2",
        json!({"type": "click", "x": 1, "y": 1}),
        &["Unexpected download"],
    )])]);
    let agent = Agent::with_defaults(FakeSurface::desktop(), service, quiet());

    let err = agent.run_turn(&[], None, None).await.unwrap_err();

    assert!(matches!(err, AgentError::SafetyCheckDeclined(ref m) if m == "Unexpected download"));
}

#[tokio::test]
async fn computer_call_without_operation_is_fatal() {
    let service = ScriptedService::new(vec![response(vec![json!({
        "type": "computer_call",
        "call_id": "call_t",
        "action": {"type": "teleport", "x": 1},
        "pending_safety_checks": []
    })])]);
    let agent = Agent::new(FakeSurface::desktop(), service, DenyAll, quiet());

    let err = agent.run_turn(&[], None, None).await.unwrap_err();

    assert!(matches!(err, AgentError::UnknownAction(ref a) if a == "teleport"));
    assert!(!agent.computer().touched());
}

#[tokio::test]
async fn request_carries_tools_model_and_filters_local_items() {
    let service = ScriptedService::new(vec![response(vec![assistant("ok")])]);
    let agent = Agent::new(FakeSurface::desktop(), service.clone(), DenyAll, quiet());
    let history = vec![Item::user("first"), Item::action_limit(1), Item::user("second")];

    agent.run_turn(&history, None, None).await.unwrap();

    let request = &service.requests()[0];
    assert_eq!(request.model, "test-model");
    assert_eq!(request.input, vec![Item::user("first"), Item::user("second")]);
    assert_eq!(
        request.tools,
        vec![ToolSchema::ComputerUsePreview {
            display_width: 1024,
            display_height: 768,
            environment: Environment::Linux,
        }]
    );
    let wire = serde_json::to_value(request).unwrap();
    assert_eq!(wire["truncation"], "auto");
}

#[tokio::test]
async fn transport_errors_propagate() {
    let service = ScriptedService::new(vec![response(vec![click_call("c", 1, 1)])]);
    let agent = Agent::new(FakeSurface::desktop(), service, DenyAll, quiet());

    // the script runs dry on the second round-trip
    let err = agent.run_turn(&[], None, None).await.unwrap_err();

    assert!(matches!(err, AgentError::Service(_)));
}
