//! Prompt content and the chat session

use super::common::*;
use agent_runner::agent::builtin_agents;
use agent_runner::chat::{build_system_prompt, AskAiSession, ChatRole, PromptContext, UpstreamError};
use agent_runner::controller::RunController;
use agent_runner_sdk::{ApprovalDecision, RunConfig};
use std::sync::Arc;
use std::time::Duration;

fn context_at_gate() -> PromptContext {
    let agent = builtin_agents().unwrap().remove(0);
    let mut controller = RunController::new(agent.clone());
    controller
        .start(RunConfig::new("John Doe (john@co.com)", "Sasha Newhire (sasha@co.com)"))
        .unwrap();
    controller.advance_by(Duration::from_millis(7000));

    PromptContext::for_agent(&agent).with_run(&controller.snapshot())
}

#[test]
fn prompt_describes_agent_users_and_run() {
    let ctx = context_at_gate();
    let prompt = build_system_prompt(&ctx);

    assert!(prompt.contains("Current Agent: \"Calling Settings Transfer\""));
    assert!(prompt.contains("Source User: John Doe (john@co.com)"));
    assert!(prompt.contains("Target User: Sasha Newhire (sasha@co.com)"));
    assert!(prompt.contains("Run Status: awaiting approval"));
    assert!(prompt.contains(&format!("Run ID: {}", ctx.run.as_ref().unwrap().id.as_ref().unwrap())));
}

#[test]
fn prompt_lists_only_changed_rows_and_flags_sensitive_ones() {
    let prompt = build_system_prompt(&context_at_gate());

    assert!(prompt.contains("  - Extension: \"None\" → \"1024\""));
    assert!(prompt.contains("  - Voicemail PIN: \"****\" → \"Reset\" ⚠️ SENSITIVE"));
    assert!(!prompt.contains("Call Waiting"));
    assert!(prompt.contains("1 sensitive setting(s) will be changed"));
}

#[test]
fn prompt_states_the_assistant_cannot_act() {
    let prompt = build_system_prompt(&context_at_gate());
    assert!(prompt.contains("You CANNOT execute, run, approve, or apply any changes"));
}

#[test]
fn completed_run_reports_settings_changed() {
    let agent = builtin_agents().unwrap().remove(0);
    let mut controller = RunController::new(agent.clone());
    controller.start(RunConfig::new("a", "b")).unwrap();
    controller.advance_by(Duration::from_millis(7000));
    controller.decide(ApprovalDecision::Approved).unwrap();
    controller.advance_by(Duration::from_millis(4000));

    let ctx = PromptContext::for_agent(&agent).with_run(&controller.snapshot());
    let prompt = build_system_prompt(&ctx);
    assert!(prompt.contains("Run Status: completed"));
    assert!(prompt.contains("Settings Changed: 4"));
}

#[tokio::test]
async fn session_sends_prompt_and_history() {
    let upstream = FakeUpstream::replying("Review looks safe except the PIN reset.");
    let mut session = AskAiSession::new(Arc::new(proxy(&upstream, Some("sk-test"))), context_at_gate());

    let reply = session.ask("Is this safe?").await.clone();
    assert_eq!(reply.role, ChatRole::Assistant);
    assert_eq!(reply.content, "Review looks safe except the PIN reset.");
    assert_eq!(session.messages.len(), 3);

    let request = upstream.last_request();
    assert_eq!(request.messages[0].role, ChatRole::System);
    assert!(request.messages[0].content.contains("CRITICAL LIMITATIONS"));
    assert_eq!(request.messages.last().unwrap().content, "Is this safe?");
}

#[tokio::test]
async fn session_turns_missing_key_into_guidance() {
    let upstream = FakeUpstream::replying("unused");
    let mut session = AskAiSession::new(Arc::new(proxy(&upstream, None)), context_at_gate());

    let reply = session.ask("hello").await;
    assert!(reply.content.starts_with("AI assistant is not configured"));
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn session_turns_upstream_failure_into_apology() {
    let upstream = FakeUpstream::failing(UpstreamError::Status {
        status: 503,
        body: String::new(),
    });
    let mut session = AskAiSession::new(Arc::new(proxy(&upstream, Some("sk-test"))), context_at_gate());

    let reply = session.ask("hello").await;
    assert_eq!(
        reply.content,
        "Sorry, I encountered an error: Failed to get response from AI service. Please try again later."
    );
}
