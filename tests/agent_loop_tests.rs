//! Agent loop behaviour against a scripted decision provider and fake
//! executors: answers, tool turns, retries, limits and interruption.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use common::{CountingFactory, ScriptedProvider, agent, answer, call, fast_config, tool_calls, transient};
use fleet_agent::agent::{AgentLoop, AgentState};
use fleet_agent::executor::ConnectionManager;
use fleet_agent::model::ModelError;
use fleet_agent::tools::ToolRegistry;
use fleet_agent::types::{Message, Role};
use fleet_agent::{Error, LoopLimit};

fn tool_messages(history: &[Message]) -> Vec<&Message> {
    history.iter().filter(|m| m.role == Role::Tool).collect()
}

fn parsed(message: &Message) -> Value {
    serde_json::from_str(&message.content).unwrap()
}

/// Every assistant tool call has exactly one result and vice versa.
fn assert_no_orphans(history: &[Message]) {
    let mut requested: Vec<&str> = history.iter().flat_map(|m| m.tool_call_ids()).collect();
    let mut answered: Vec<&str> = history
        .iter()
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    requested.sort_unstable();
    answered.sort_unstable();
    assert_eq!(requested, answered);
}

// ============================================================================
// 1. Completing runs
// ============================================================================

mod completion_tests {
    use super::*;

    #[tokio::test]
    async fn test_immediate_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(answer("all good"))]));
        let factory = Arc::new(CountingFactory::new());
        let agent = agent(&provider, &factory, fast_config());

        let result = agent.run("status?").await.unwrap();

        assert_eq!(result.text, "all good");
        assert_eq!(result.state, AgentState::Done);
        assert_eq!(result.iterations(), 1);
        assert_eq!(result.tool_calls(), 0);
        assert_eq!(result.messages.len(), 2);
        assert_eq!(agent.state().await, AgentState::Done);
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn test_tool_turn_then_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_calls(vec![call(
                "c1",
                "exec_shell",
                json!({"command": "uptime", "target": "web"}),
            )])),
            Ok(answer("web is up")),
        ]));
        let factory = Arc::new(CountingFactory::new());
        let agent = agent(&provider, &factory, fast_config());

        let result = agent.run("is web up?").await.unwrap();

        assert_eq!(result.text, "web is up");
        assert_eq!(result.iterations(), 2);
        assert_eq!(result.tool_calls(), 1);

        let roles: Vec<Role> = result.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_no_orphans(&result.messages);

        let tool = parsed(tool_messages(&result.messages)[0]);
        assert_eq!(tool["ok"], true);
        assert_eq!(tool["target"], "web");
        assert_eq!(tool["result"]["stdout"], "ran: uptime");

        let second = &provider.requests()[1];
        assert_eq!(second.messages.last().unwrap().tool_call_id.as_deref(), Some("c1"));
        assert_eq!(second.tools.len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fed_back() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_calls(vec![call("c1", "format_disk", json!({}))])),
            Ok(answer("that tool does not exist")),
        ]));
        let factory = Arc::new(CountingFactory::new());
        let agent = agent(&provider, &factory, fast_config());

        let result = agent.run("wipe it").await.unwrap();

        assert_eq!(result.text, "that tool does not exist");
        let tool = parsed(tool_messages(&result.messages)[0]);
        assert_eq!(tool["ok"], false);
        assert_eq!(tool["kind"], "unknown_tool");
        assert_eq!(result.metrics.tool_stats["format_disk"].errors, 1);
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn test_results_follow_request_order_across_targets() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_calls(vec![
                call("c1", "exec_shell", json!({"command": "uptime", "target": "web"})),
                call("c2", "exec_shell", json!({"command": "hostname", "target": "dc"})),
                call("c3", "read_file", json!({"path": "/home/ops/notes.txt"})),
            ])),
            Ok(answer("done")),
        ]));
        let factory =
            Arc::new(CountingFactory::new().with_command_delay(Duration::from_millis(50)));
        let agent = agent(&provider, &factory, fast_config());

        let result = agent.run("check both").await.unwrap();

        let ids: Vec<&str> = tool_messages(&result.messages)
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(result.tool_calls(), 3);
        assert_eq!(factory.created(), 3);

        let web = factory.events_for("web");
        let dc = factory.events_for("dc");
        assert!(web[0].overlaps(&dc[0]));
    }

    #[tokio::test]
    async fn test_repeated_and_empty_call_ids_get_fresh_ids() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_calls(vec![
                call("dup", "exec_shell", json!({"command": "uptime"})),
                call("dup", "exec_shell", json!({"command": "hostname"})),
                call("", "exec_shell", json!({"command": "whoami"})),
            ])),
            Ok(tool_calls(vec![call("dup", "exec_shell", json!({"command": "date"}))])),
            Ok(answer("done")),
        ]));
        let factory = Arc::new(CountingFactory::new());
        let agent = agent(&provider, &factory, fast_config());

        let result = agent.run("identify the host").await.unwrap();

        let ids: Vec<&str> = tool_messages(&result.messages)
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], "dup");
        let unique: std::collections::HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 4);
        assert!(ids.iter().all(|id| !id.is_empty()));
        assert_no_orphans(&result.messages);

        let stdout: Vec<Value> = tool_messages(&result.messages)
            .iter()
            .map(|m| parsed(m)["result"]["stdout"].clone())
            .collect();
        assert_eq!(
            stdout,
            vec![
                json!("ran: uptime"),
                json!("ran: hostname"),
                json!("ran: whoami"),
                json!("ran: date")
            ]
        );
    }

    #[tokio::test]
    async fn test_history_persists_until_reset() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(answer("first")),
            Ok(answer("second")),
        ]));
        let factory = Arc::new(CountingFactory::new());
        let agent = agent(
            &provider,
            &factory,
            fast_config().with_system_prompt("You operate a fleet."),
        );

        agent.run("one").await.unwrap();
        let result = agent.run("two").await.unwrap();

        assert_eq!(result.messages.len(), 5);
        assert_eq!(result.messages[0].role, Role::System);
        assert_eq!(provider.requests()[1].messages.len(), 4);

        agent.reset().await;
        let history = agent.history().await;
        assert_eq!(history, vec![Message::system("You operate a fleet.")]);
        assert_eq!(agent.state().await, AgentState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_releases_live_executors() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_calls(vec![
                call("c1", "list_files", json!({"path": "/srv", "target": "web"})),
                call("c2", "exec_shell", json!({"command": "ver", "target": "dc"})),
            ])),
            Ok(answer("listed")),
        ]));
        let factory = Arc::new(CountingFactory::new());
        let agent = agent(&provider, &factory, fast_config());

        agent.run("look around").await.unwrap();
        assert_eq!(agent.registry().resolver().active_targets().len(), 2);

        assert_eq!(agent.shutdown().await, 2);
        assert!(agent.registry().resolver().active_targets().is_empty());
    }
}

// ============================================================================
// 2. Decision retries
// ============================================================================

mod retry_tests {
    use super::*;

    #[tokio::test]
    async fn test_transient_failures_are_retried_without_replaying_tools() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_calls(vec![call(
                "c1",
                "exec_shell",
                json!({"command": "uptime", "target": "web"}),
            )])),
            Err(transient()),
            Err(transient()),
            Ok(answer("recovered")),
        ]));
        let factory = Arc::new(CountingFactory::new());
        let agent = agent(&provider, &factory, fast_config());

        let result = agent.run("uptime please").await.unwrap();

        assert_eq!(result.text, "recovered");
        assert_eq!(result.metrics.decision_retries, 2);
        assert_eq!(result.metrics.decision_calls, 4);
        assert_eq!(provider.calls(), 4);
        assert_eq!(factory.events_for("web").len(), 1);
        assert_eq!(tool_messages(&result.messages).len(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let provider = Arc::new(ScriptedProvider::new(
            (0..10).map(|_| Err(transient())).collect(),
        ));
        let factory = Arc::new(CountingFactory::new());
        let agent = agent(&provider, &factory, fast_config());

        let err = agent.run("hello").await.unwrap_err();

        assert!(matches!(err, Error::ModelUnavailable { attempts: 4, .. }), "{:?}", err);
        assert!(err.is_retryable());
        assert_eq!(provider.calls(), 4);
        assert_eq!(agent.state().await, AgentState::Error);
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ModelError::Unauthorized {
            status: 401,
            message: "bad key".into(),
        })]));
        let factory = Arc::new(CountingFactory::new());
        let agent = agent(&provider, &factory, fast_config());

        let err = agent.run("hello").await.unwrap_err();

        assert!(matches!(err, Error::Model(ModelError::Unauthorized { .. })), "{:?}", err);
        assert!(err.is_authorization_error());
        assert_eq!(provider.calls(), 1);
    }
}

// ============================================================================
// 3. Limits and fatal conditions
// ============================================================================

mod limit_tests {
    use super::*;

    #[tokio::test]
    async fn test_iteration_limit() {
        let provider = Arc::new(ScriptedProvider::repeating(tool_calls(vec![call(
            "c1",
            "exec_shell",
            json!({"command": "uptime"}),
        )])));
        let factory = Arc::new(CountingFactory::new());
        let agent = agent(&provider, &factory, fast_config().with_max_iterations(3));

        let err = agent.run("loop forever").await.unwrap_err();

        assert!(matches!(err, Error::LoopExceeded(LoopLimit::Iterations(3))), "{:?}", err);
        assert_eq!(provider.calls(), 3);
        assert_eq!(factory.events_for("local").len(), 3);
        assert_no_orphans(&agent.history().await);
    }

    #[tokio::test]
    async fn test_token_budget_exhausted() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(answer("unreachable"))]));
        let factory = Arc::new(CountingFactory::new());
        let agent = agent(&provider, &factory, fast_config().with_max_context_tokens(5));

        let err = agent
            .run("please summarize every log file on every machine in detail")
            .await
            .unwrap_err();

        let Error::LoopExceeded(LoopLimit::TokenBudget { current, max }) = err else {
            panic!("expected token budget error, got {:?}", err);
        };
        assert_eq!(max, 5);
        assert!(current > max);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_long_tool_run_stays_within_budget() {
        let mut script: Vec<_> = (0..8)
            .map(|i| {
                Ok(tool_calls(vec![call(
                    &format!("c{}", i),
                    "exec_shell",
                    json!({"command": format!("tail -n 20 /var/log/app{}.log", i), "target": "web"}),
                )]))
            })
            .collect();
        script.push(Ok(answer("done")));
        let provider = Arc::new(ScriptedProvider::new(script));
        let factory = Arc::new(CountingFactory::new());
        let agent = agent(&provider, &factory, fast_config().with_max_context_tokens(300));

        let result = agent.run("collect the recent app logs").await.unwrap();

        assert_eq!(result.text, "done");
        assert_eq!(result.iterations(), 9);
        assert_eq!(result.tool_calls(), 8);
        assert!(result.metrics.truncations > 0);
        assert!(agent.memory().read().await.is_within_limit());
        assert_no_orphans(&result.messages);

        for request in provider.requests() {
            assert_eq!(request.messages[0].role, Role::User);
            assert_eq!(request.messages[0].content, "collect the recent app logs");
            assert_no_orphans(&request.messages);
        }
    }

    #[tokio::test]
    async fn test_authentication_failure_stops_run() {
        let provider = Arc::new(ScriptedProvider::repeating(tool_calls(vec![call(
            "c1",
            "list_files",
            json!({"path": "/srv", "target": "web"}),
        )])));
        let factory = Arc::new(CountingFactory::new().with_auth_failure("web"));
        let agent = agent(&provider, &factory, fast_config());

        let err = agent.run("list /srv on web").await.unwrap_err();

        assert!(
            matches!(err, Error::AuthenticationFailed { ref target, .. } if target == "web"),
            "{:?}",
            err
        );
        assert_eq!(provider.calls(), 1);
        assert_eq!(agent.state().await, AgentState::Error);

        let history = agent.history().await;
        assert_no_orphans(&history);
        assert_eq!(parsed(tool_messages(&history)[0])["kind"], "authentication_failed");
    }

    #[tokio::test]
    async fn test_empty_fleet_is_configuration_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(answer("unreachable"))]));
        let factory = Arc::new(CountingFactory::new());
        let manager = ConnectionManager::with_factory(Vec::new(), factory).unwrap();
        let registry = ToolRegistry::with_builtin_tools(Arc::new(manager));
        let agent = AgentLoop::new(provider.clone(), Arc::new(registry), fast_config());

        let err = agent.run("hello").await.unwrap_err();

        assert!(matches!(err, Error::Config(_)), "{:?}", err);
        assert_eq!(provider.calls(), 0);
    }
}

// ============================================================================
// 4. Cancellation and deadlines
// ============================================================================

mod interrupt_tests {
    use super::*;

    fn slow_provider() -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider::new(vec![Ok(tool_calls(vec![call(
            "c1",
            "exec_shell",
            json!({"command": "sleep 30", "target": "web"}),
        )]))]))
    }

    #[tokio::test]
    async fn test_cancel_during_tool_execution() {
        let provider = slow_provider();
        let factory = Arc::new(CountingFactory::new().with_command_delay(Duration::from_secs(10)));
        let agent = agent(&provider, &factory, fast_config());

        let token = CancellationToken::new();
        let canceller = token.clone();
        let started = Instant::now();
        let (result, _) = tokio::join!(agent.run_with_cancellation("sleep on web", token), async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            canceller.cancel();
        });

        assert!(matches!(result, Err(Error::Cancelled)), "{:?}", result.err());
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(agent.state().await, AgentState::Cancelled);
        assert!(agent.registry().resolver().active_targets().is_empty());

        let history = agent.history().await;
        assert_no_orphans(&history);
        let tool = parsed(tool_messages(&history)[0]);
        assert_eq!(tool["kind"], "execution_failed");
        assert!(tool["error"].as_str().unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(answer("unreachable"))]));
        let factory = Arc::new(CountingFactory::new());
        let agent = agent(&provider, &factory, fast_config());

        let token = CancellationToken::new();
        token.cancel();
        let err = agent.run_with_cancellation("hello", token).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_run_deadline() {
        let provider = slow_provider();
        let factory = Arc::new(CountingFactory::new().with_command_delay(Duration::from_secs(10)));
        let limit = Duration::from_millis(200);
        let agent = agent(&provider, &factory, fast_config().with_timeout(limit));

        let started = Instant::now();
        let err = agent.run("sleep on web").await.unwrap_err();

        assert!(matches!(err, Error::Timeout(d) if d == limit), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(agent.state().await, AgentState::Cancelled);
        assert_no_orphans(&agent.history().await);
    }

    #[tokio::test]
    async fn test_agent_usable_after_cancellation() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_calls(vec![call(
                "c1",
                "exec_shell",
                json!({"command": "sleep 30", "target": "web"}),
            )])),
            Ok(answer("back again")),
        ]));
        let factory = Arc::new(CountingFactory::new().with_command_delay(Duration::from_secs(10)));
        let agent = agent(
            &provider,
            &factory,
            fast_config().with_timeout(Duration::from_millis(150)),
        );

        assert!(agent.run("first").await.is_err());
        let result = agent.run("second").await.unwrap();
        assert_eq!(result.text, "back again");
        assert_no_orphans(&result.messages);
    }
}
