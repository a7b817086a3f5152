//! Cross-crate integration and E2E tests
//!
//! These tests drive full agent turns through the prompt engine: prompt
//! assembly, a (mock) model call, response filling, the continue-round
//! decision and tool execution feeding the next round.

use std::sync::Arc;

use quire_prompt::{
    AgentHandlerContext, AgentInstanceMessage, AgentPromptDescription, DefaultUriLoader,
    FlatPrompt, FullReplacementParam, FunctionParam, GenerationConfig, HandlerDeps,
    InMemoryWikiService, InMemoryWorkspaceService, JavascriptToolParam, LLMBackend, MessageRole,
    MockBackend, ModelTrigger, PositionParameter, PromptDynamicModification, PromptEngine,
    PromptNode, PromptRole, Response, ResponseDynamicModification,
    RetrievalAugmentedGenerationParam, StaticFunctionExecutor, Tool, ToolRegistry, Trigger,
    WIKI_SEARCH_TOOL_ID, Workspace, collect_response, match_tool_calling,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

// ============================================================================
// Helpers
// ============================================================================

fn services() -> (Arc<InMemoryWorkspaceService>, Arc<InMemoryWikiService>) {
    let workspaces = InMemoryWorkspaceService::new(vec![Workspace::wiki(
        "ws1",
        "notes",
        "/wikis/notes",
    )]);
    let wiki = InMemoryWikiService::new()
        .with_tiddler("ws1", "Rust ownership", "Each value has one owner.")
        .with_tiddler("ws1", "Gardening", "Water daily.")
        .with_tiddler("ws1", "Greeting script", "Say hello in French.");
    (Arc::new(workspaces), Arc::new(wiki))
}

fn wiki_agent() -> AgentPromptDescription {
    AgentPromptDescription::new("wiki-agent")
        .with_prompt(PromptNode::leaf("system", "You answer from the user's wiki."))
        .with_prompt(PromptNode::new("history").enabled())
        .with_modification(PromptDynamicModification::full_replacement(
            "history",
            FullReplacementParam::history("history"),
        ))
        .with_modification(PromptDynamicModification::retrieval_augmented_generation(
            "wiki-tools",
            RetrievalAugmentedGenerationParam {
                tool_list_position: Some(PositionParameter::after("system")),
                trigger: Some(Trigger::search("wiki")),
                ..Default::default()
            },
        ))
        .with_response(Response::new("llm-response"))
        .with_response_modification(ResponseDynamicModification::full_replacement(
            "fill",
            FullReplacementParam::llm_response("llm-response"),
        ))
}

async fn generate(backend: &MockBackend, prompts: Vec<FlatPrompt>) -> String {
    let stream = backend
        .generate(prompts, GenerationConfig::default())
        .await
        .unwrap();
    collect_response(stream).await.unwrap()
}

/// Serve one HTTP response with `body` on a local port.
async fn serve_once(body: &'static str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
    });
    format!("http://{}/tool.js", addr)
}

// ============================================================================
// Multi-Round Scenario
// ============================================================================

/// E2E Test: a tool call round followed by a final answer
///
/// 1. The tool list is injected because the user mentions the wiki
/// 2. The model asks for a wiki search, so the round continues
/// 3. The tool result joins the history and the model answers
#[tokio::test]
async fn test_e2e_tool_round_then_answer() {
    let (workspaces, wiki) = services();
    let tools = Arc::new(ToolRegistry::with_builtin_tools(
        workspaces.clone(),
        wiki.clone(),
    ));
    let engine = PromptEngine::from_services(workspaces, wiki);
    let agent = wiki_agent();
    let backend = MockBackend::new(vec![
        r#"Let me search. <tool_use name="wiki-search">{"workspaceName": "notes", "filter": "rust"}</tool_use>"#
            .to_string(),
        "Each value in Rust has exactly one owner.".to_string(),
    ]);

    // Round 1
    let mut messages = vec![AgentInstanceMessage::user("m1", "What does my wiki say about Rust?")];
    let output = engine.prompt_concat(&agent, &messages).await;
    assert!(output.flat_prompts[1].content.contains("Tool ID: wiki-search"));
    assert_eq!(
        output.flat_prompts.last(),
        Some(&FlatPrompt::user("What does my wiki say about Rust?"))
    );

    let answer = generate(&backend, output.flat_prompts).await;
    let responses = engine.response_concat(&agent, &answer).await;
    assert_eq!(responses[0].text.as_deref(), Some(answer.as_str()));

    let ctx = AgentHandlerContext::new(agent.id.clone(), messages.clone());
    let decision = engine.continue_round(&agent, &answer, &ctx).await;
    assert!(decision.continue_round);

    // Tool execution happens outside the engine.
    let call = match_tool_calling(&answer).unwrap();
    let tool = tools.get_tool(call.tool_id.as_deref().unwrap()).unwrap();
    let result = tool.execute(call.parameters.unwrap()).await.unwrap();
    assert_eq!(result.trim(), "- Rust ownership");

    messages.push(AgentInstanceMessage::assistant("m2", answer.clone()));
    messages.push(AgentInstanceMessage::new("m3", MessageRole::Other, result));

    // Round 2
    let output = engine.prompt_concat(&agent, &messages).await;
    let history = output.processed_prompts.find("history").unwrap();
    assert_eq!(history.children.len(), 2);
    assert_eq!(history.children[1].role, Some(PromptRole::User));
    assert!(history.full_text().contains("- Rust ownership"));

    let answer = generate(&backend, output.flat_prompts).await;
    let ctx = AgentHandlerContext::new(agent.id.clone(), messages.clone());
    let decision = engine.continue_round(&agent, &answer, &ctx).await;
    assert!(!decision.continue_round);
    assert_eq!(
        decision.reason.as_deref(),
        Some("No tool calling patterns detected")
    );
    assert_eq!(backend.request_count(), 2);
}

#[tokio::test]
async fn test_e2e_unknown_tool_stops() {
    let (workspaces, wiki) = services();
    let engine = PromptEngine::from_services(workspaces, wiki);

    let decision = engine
        .continue_round(
            &wiki_agent(),
            &format!("<tool_use name=\"{}-v2\">{{}}</tool_use>", WIKI_SEARCH_TOOL_ID),
            &AgentHandlerContext::new("wiki-agent", vec![]),
        )
        .await;
    assert!(!decision.continue_round);
    assert!(decision.reason.unwrap().contains("not found in registry"));
}

// ============================================================================
// Deferred Content
// ============================================================================

/// Deferred handlers populate the next round, not the current one.
#[tokio::test]
async fn test_e2e_deferred_content_reaches_next_round() {
    let (workspaces, wiki) = services();
    let temp = tempfile::tempdir().unwrap();
    let script = temp.path().join("script.js");
    std::fs::write(&script, "Always cite tiddler titles.").unwrap();

    let mut function = FunctionParam::new(PositionParameter::relative("system"), "today");
    function.trigger = Some(Trigger {
        model: Some(ModelTrigger {
            user: Some("Does the user ask about dates?".into()),
            ..Default::default()
        }),
        ..Default::default()
    });

    let deps = HandlerDeps::new(workspaces, wiki.clone())
        .with_functions(Arc::new(
            StaticFunctionExecutor::default().with_output("today", " Today is Monday."),
        ))
        .with_backend(Arc::new(MockBackend::with_text("Yes, it does.")));
    let engine = PromptEngine::new(&deps, Arc::new(ToolRegistry::new()));
    let agent = AgentPromptDescription::new("a")
        .with_prompt(PromptNode::leaf("system", "Rules."))
        .with_modification(PromptDynamicModification::function("date", function))
        .with_modification(PromptDynamicModification::javascript_tool(
            "file-script",
            JavascriptToolParam {
                position: PositionParameter::after("system"),
                uri: format!("file://{}", script.display()),
            },
        ))
        .with_modification(PromptDynamicModification::javascript_tool(
            "wiki-script",
            JavascriptToolParam {
                position: PositionParameter::before("system"),
                uri: "tidgi://ws1/Greeting script".into(),
            },
        ));

    let output = engine
        .prompt_concat(&agent, &[AgentInstanceMessage::user("m1", "What day is it?")])
        .await;
    assert_eq!(
        output.flat_prompts,
        vec![FlatPrompt::system("Rules."), FlatPrompt::user("What day is it?")]
    );
    assert_eq!(output.deferred.len(), 3);

    output.deferred.settle().await;
    let flattened = output.processed_prompts.flatten();
    let contents: Vec<&str> = flattened.iter().map(|p| p.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "Say hello in French.",
            "Rules. Today is Monday.",
            "Always cite tiddler titles."
        ]
    );
}

#[tokio::test]
async fn test_e2e_http_uri_content() {
    let url = serve_once("Prefer short answers.").await;
    let (workspaces, wiki) = services();
    let deps = HandlerDeps::new(workspaces, wiki.clone())
        .with_uri_loader(Arc::new(DefaultUriLoader::new(wiki)));
    let engine = PromptEngine::new(&deps, Arc::new(ToolRegistry::new()));
    let agent = AgentPromptDescription::new("a")
        .with_prompt(PromptNode::leaf("system", "Rules."))
        .with_modification(PromptDynamicModification::javascript_tool(
            "remote",
            JavascriptToolParam {
                position: PositionParameter::after("system"),
                uri: url,
            },
        ));

    let output = engine
        .prompt_concat(&agent, &[AgentInstanceMessage::user("m1", "hi")])
        .await;
    output.deferred.settle().await;

    let roots = output.processed_prompts.snapshot();
    assert_eq!(roots.len(), 2);
    assert_eq!(roots[1].full_text(), "Prefer short answers.");
}
