use browser_agent::agent::{ActionCall, Agent, Task};
use browser_agent::auth::{AttemptOutcome, POST_CONDITION};
use browser_agent::core::config::DomConfig;
use browser_agent::testing::{MockPage, ScriptedModel, Trigger};
use browser_agent::{AgentContext, AgentError, Config, DomProcessor, RegistryError};
use serde_json::json;
use std::sync::Arc;

const HOME: &str = r#"<html><head><title>Acme</title></head><body>
    <a href="/login">Sign in</a></body></html>"#;

const LOGIN: &str = r#"<html><head><title>Sign in</title></head><body>
    <h1>Sign in to Acme</h1>
    <form action="/session">
        <label for="email">Email</label>
        <input id="email" type="email" name="email" placeholder="Email address">
        <label for="password">Password</label>
        <input id="password" type="password" name="password">
        <button type="submit">Sign in</button>
    </form>
</body></html>"#;

const DASHBOARD: &str = r#"<html><head><title>Dashboard</title></head><body>
    <h1>Welcome back</h1><a href="/logout">Log out</a></body></html>"#;

const SEARCH: &str = r#"<html><body>
    <input type="search" name="q" placeholder="Search products">
    <button>Search</button></body></html>"#;

fn config() -> Config {
    let mut config = Config::default();
    config.auth.settle_ms = 0;
    config.session.settle_ms = 0;
    config
}

fn login_site() -> Arc<MockPage> {
    Arc::new(
        MockPage::new("http://localhost/", HOME)
            .with_route("http://localhost/login", LOGIN)
            .on(
                Trigger::Click("button[type='submit']".into()),
                "http://localhost/dashboard",
                DASHBOARD,
            ),
    )
}

#[test]
fn snapshots_of_an_unchanged_page_agree() {
    tokio_test::block_on(async {
        let page = MockPage::new("http://localhost/login", LOGIN);
        let processor = DomProcessor::new(DomConfig::default());

        let first = processor.index_page(&page).await.unwrap();
        let second = processor.index_page(&page).await.unwrap();

        assert_eq!(first.total_count, second.total_count);
        assert_eq!(first.interactive_count, second.interactive_count);
        assert_ne!(first.snapshot_id, second.snapshot_id);
        for (a, b) in first.elements.iter().zip(&second.elements) {
            assert_eq!(a.index, b.index);
            assert_eq!(a.tag, b.tag);
            assert_eq!(a.xpath, b.xpath);
            assert_eq!(a.attributes, b.attributes);
        }
        assert_eq!(first.interactive_count, 3);
    });
}

#[tokio::test]
async fn unregistered_action_is_a_registry_error() {
    let page = Arc::new(MockPage::new("http://localhost/", SEARCH));
    let agent = Agent::new(page.clone(), None, config()).unwrap();

    let err = agent
        .run(Task::Structured(vec![ActionCall::new("teleport", json!({}))]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AgentError::Registry(RegistryError::UnknownAction(ref name)) if name == "teleport"
    ));

    // A handler that cannot find its element is an ordinary failed step.
    let outcome = agent
        .run(Task::Structured(vec![ActionCall::new("click", json!({"selector": "#gone"}))]))
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(outcome.failure.unwrap().starts_with("step 0 (click) failed"));
}

#[tokio::test]
async fn missing_parameter_touches_nothing() {
    let page = Arc::new(MockPage::new("http://localhost/", SEARCH));
    let agent = Agent::new(page.clone(), None, config()).unwrap();
    let dom = DomProcessor::new(DomConfig::default())
        .index_page(page.as_ref())
        .await
        .unwrap();
    let mut context = AgentContext::new(page.clone(), dom);

    let result = agent
        .registry()
        .execute("type", json!({"selector": "input[name='q']"}), &mut context)
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.error_message().contains("missing required parameter 'text'"));
    assert!(page.calls().is_empty());
}

#[tokio::test]
async fn every_response_shape_drives_the_same_plan() {
    let plan = r#"[{"action": "fill", "selector": "input[name='q']", "value": "boots"}, {"action": "press", "value": "Enter"}]"#;
    let responses = [
        format!("Here you go:\n```json\n{}\n```", plan),
        plan.to_string(),
        format!("{{\"actions\": {}}}", plan),
        format!("The plan is {} and that is all.", plan),
    ];

    for response in responses {
        let page = Arc::new(MockPage::new("http://localhost/", SEARCH));
        let model = Arc::new(ScriptedModel::new([response.clone()]));
        let agent = Agent::new(page.clone(), Some(model), config()).unwrap();

        let outcome = agent.run(Task::Natural("search for boots".into())).await.unwrap();
        assert!(outcome.success, "{}: {:?}", response, outcome.failure);
        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(page.filled_value("input[name='q']").as_deref(), Some("boots"));
        assert_eq!(page.calls().last().map(String::as_str), Some("press Enter"));
    }
}

#[tokio::test]
async fn prose_response_never_executes() {
    let page = Arc::new(MockPage::new("http://localhost/", SEARCH));
    let mut config = config();
    config.agent.max_attempts = 1;
    let model = Arc::new(ScriptedModel::new(["You should type boots into the search box."]));
    let agent = Agent::new(page.clone(), Some(model), config).unwrap();

    let outcome = agent.run(Task::Natural("search for boots".into())).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.steps_executed, 0);
    assert!(outcome.failure.unwrap().contains("not a valid plan"));
    assert!(page.calls().is_empty());
}

#[tokio::test]
async fn react_style_ids_are_escaped_and_resolve() {
    let html = r#"<html><body><form><input id=":r2:" type="text"></form></body></html>"#;
    let page = Arc::new(MockPage::new("http://localhost/", html));
    let agent = Agent::new(page.clone(), None, config()).unwrap();

    let outcome = agent
        .run(Task::Structured(vec![ActionCall::new(
            "type",
            json!({"selector": "#:r2:", "text": "hello"}),
        )]))
        .await
        .unwrap();
    assert!(outcome.success, "{:?}", outcome.failure);
    assert_eq!(page.calls(), vec![r"fill #\:r2\:".to_string()]);
    assert_eq!(page.filled_value(r"#\:r2\:").as_deref(), Some("hello"));
}

#[tokio::test]
async fn cascade_falls_through_to_form_detection() {
    let html = r#"<html><body><form>
        <input type="text" name="user"><input type="password" name="pass">
    </form></body></html>"#;
    let page = Arc::new(MockPage::new("http://localhost/login", html).on(
        Trigger::Script("requestSubmit".into()),
        "http://localhost/home",
        DASHBOARD,
    ));
    let agent = Agent::new(page.clone(), None, config()).unwrap();

    let auth = agent.login("me", "pw").await;
    assert!(auth.success, "{}", auth.failure_summary());
    assert_eq!(auth.strategy.as_deref(), Some("form_detection"));
    assert_eq!(auth.verification_method.as_deref(), Some(POST_CONDITION));

    let outcomes: Vec<_> = auth.attempts.iter().map(|a| (a.strategy.as_str(), a.outcome)).collect();
    assert_eq!(
        outcomes,
        vec![
            ("tab_order", AttemptOutcome::VerificationFailed),
            ("visual_proximity", AttemptOutcome::VerificationFailed),
            ("form_detection", AttemptOutcome::Verified),
        ]
    );
    assert!(!page.current_url().contains("/login"));
}

#[tokio::test]
async fn navigate_then_smart_login_end_to_end() {
    let page = login_site();
    let agent = Agent::new(page.clone(), None, config()).unwrap();

    let outcome = agent
        .run(Task::Structured(vec![
            ActionCall::new("navigate", json!({"url": "/login"})),
            ActionCall::new("smart_login", json!({"email": "me@acme.test", "password": "hunter2"})),
        ]))
        .await
        .unwrap();

    assert!(outcome.success, "{:?}", outcome.failure);
    assert_eq!(outcome.final_url, "http://localhost/dashboard");
    let auth = outcome.auth.expect("smart_login reports its result");
    assert!(auth.success);
    assert_eq!(auth.strategy.as_deref(), Some("smart_login"));
    assert_eq!(auth.verification_method.as_deref(), Some(POST_CONDITION));

    let calls = page.calls();
    assert_eq!(calls.iter().filter(|c| c.starts_with("fill ")).count(), 2);
    assert_eq!(calls.iter().filter(|c| c.starts_with("click ")).count(), 1);
}

#[tokio::test]
async fn natural_language_login_is_verified_by_the_oracle() {
    let page = login_site();
    let model = Arc::new(ScriptedModel::new([
        r##"[{"action": "goto", "value": "/login"}]"##,
        r##"```json
{"actions": [
  {"action": "fill", "selector": "#email", "value": "me@acme.test"},
  {"action": "fill", "selector": "#password", "value": "hunter2"},
  {"action": "click", "selector": "button[type='submit']"}
]}
```"##,
    ]));
    let agent = Agent::new(page.clone(), Some(model.clone()), config()).unwrap();

    let outcome = agent.run(Task::Natural("Log in as me@acme.test".into())).await.unwrap();

    // The first plan only reaches the login page, so the oracle sends the
    // agent round again.
    assert!(outcome.success, "{:?}", outcome.failure);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.steps_executed, 4);
    let verdict = outcome.verdict.unwrap();
    assert_eq!(verdict.method, POST_CONDITION);
    assert!(verdict.detail.contains("log out") || verdict.detail.contains("welcome"));
    assert!(model.prompts()[1].contains("still on login path"));
    assert_eq!(outcome.final_url, "http://localhost/dashboard");
}
