//! Purpose: Pin the `/execute` protocol contract at the service boundary.
//! Role: Integration tests for namespace resolution, the registry import hook, capture and hot reload.
//! Invariants: Tests speak only `Message`/`Response`, plus public module-system accessors.
use std::sync::Arc;

use lpy::api::{ExecutionService, Message, ModuleSystem, Response, ResponseType};
use lpy::script::ScriptEvaluator;
use serde_json::{Value, json};

fn service() -> ExecutionService {
    ExecutionService::with_evaluator(Arc::new(ScriptEvaluator::new()))
}

fn send(service: &ExecutionService, message: Message) -> Response {
    service.execute(&message).response
}

fn ok(service: &ExecutionService, message: Message) -> Response {
    let response = send(service, message);
    assert_eq!(
        response.kind,
        ResponseType::Result,
        "unexpected error: {:?}\nstderr: {}",
        response.error,
        response.stderr
    );
    response
}

fn result_of(service: &ExecutionService, message: Message) -> Value {
    ok(service, message).result.expect("result present")
}

fn assert_envelope(response: &Response) {
    let encoded = serde_json::to_value(response).expect("encode");
    let object = encoded.as_object().expect("object");
    assert!(object.contains_key("stdout"));
    assert!(object.contains_key("stderr"));
    match response.kind {
        ResponseType::Result => {
            assert!(object.contains_key("result"));
            assert!(!object.contains_key("error"));
        }
        ResponseType::Error => {
            assert!(object.contains_key("error"));
            assert!(!object.contains_key("result"));
        }
    }
}

#[test]
fn eval_returns_value_with_empty_output() {
    let service = service();
    let response = ok(&service, Message::eval("1 + 1"));
    assert_eq!(response.result, Some(json!(2)));
    assert_eq!(response.stdout, "");
    assert_eq!(response.stderr, "");
    assert_envelope(&response);
}

#[test]
fn exec_captures_stdout_and_returns_null() {
    let service = service();
    let response = ok(&service, Message::exec("print(\"hello\")"));
    assert_eq!(response.result, Some(Value::Null));
    assert_eq!(response.stdout, "hello\n");
    assert_envelope(&response);
}

#[test]
fn unknown_type_is_a_protocol_error() {
    let service = service();
    let response = send(&service, Message::new("bogus").with_code("1"));
    assert_eq!(response.kind, ResponseType::Error);
    assert_eq!(response.error.as_deref(), Some("Unknown type: bogus"));
    assert_envelope(&response);

    let untyped: Message = serde_json::from_value(json!({"code": "1"})).expect("message");
    let response = send(&service, untyped);
    assert_eq!(response.error.as_deref(), Some("Unknown type: "));
}

#[test]
fn status_never_parses_code() {
    let service = service();
    let response = ok(
        &service,
        Message::status().with_code("this is ( not valid print(\"x\")"),
    );
    assert_eq!(response.result, Some(json!({"alive": true})));
    assert_eq!(response.stdout, "");
}

#[test]
fn quit_answers_before_exit() {
    let service = service();
    let outcome = service.execute(&Message::quit().with_code("ignored ("));
    assert!(outcome.quit);
    assert_eq!(outcome.response.kind, ResponseType::Result);
    assert_eq!(outcome.response.result, Some(Value::Null));
}

#[test]
fn output_before_failure_is_kept() {
    let service = service();
    let response = send(
        &service,
        Message::exec("print(\"step 1\")\neprint(\"careful\")\nundefined_call()"),
    );
    assert_eq!(response.kind, ResponseType::Error);
    assert_eq!(response.stdout, "step 1\n");
    assert!(response.stderr.starts_with("careful\n"));
    assert!(response.stderr.contains("name 'undefined_call' is not defined"));
    assert_envelope(&response);
}

#[test]
fn registry_module_imports_once_and_is_shared() {
    let service = service();
    service.modules().registry().register(
        "greeter",
        "print(\"loading\")\nname = \"world\"\nfn greet() { return \"hello \" + name }",
        "/virtual/greeter.lpy",
    );

    let first = ok(&service, Message::exec("import greeter"));
    assert_eq!(first.stdout, "loading\n");
    let second = ok(&service, Message::exec("import greeter as g"));
    assert_eq!(second.stdout, "");

    assert_eq!(
        result_of(&service, Message::eval("greeter.greet()")),
        json!("hello world")
    );
    assert_eq!(result_of(&service, Message::eval("g.__name__")), json!("greeter"));
    assert_eq!(
        result_of(&service, Message::eval("g.__file__")),
        json!("/virtual/greeter.lpy")
    );

    let cached = service.modules().lookup("greeter").expect("cached");
    let targeted = result_of(&service, Message::eval("greet()").with_module("greeter"));
    assert_eq!(targeted, json!("hello world"));
    assert!(service.modules().lookup("greeter").expect("cached").ptr_eq(&cached));
}

#[test]
fn module_target_defaults_to_import() {
    let service = service();
    let response = send(&service, Message::eval("1").with_module("nowhere"));
    assert_eq!(response.kind, ResponseType::Error);
    assert_eq!(response.error.as_deref(), Some("No module named 'nowhere'"));
    assert!(service.modules().lookup("nowhere").is_none());
}

#[test]
fn import_or_create_then_create_reuses_namespace() {
    let service = service();
    ok(
        &service,
        Message::exec("counter = 1")
            .with_module("scratch")
            .with_create_method("import_or_create"),
    );
    let created = service.modules().lookup("scratch").expect("created");
    ok(
        &service,
        Message::exec("counter += 1")
            .with_module("scratch")
            .with_create_method("create"),
    );
    assert!(service.modules().lookup("scratch").expect("cached").ptr_eq(&created));
    assert_eq!(
        result_of(&service, Message::eval("counter").with_module("scratch")),
        json!(2)
    );
    let response = send(&service, Message::eval("counter"));
    assert_eq!(response.kind, ResponseType::Error);
}

#[test]
fn import_or_create_prefers_registered_source() {
    let service = service();
    service
        .modules()
        .registry()
        .register("settings", "debug = true", "/virtual/settings.lpy");
    assert_eq!(
        result_of(
            &service,
            Message::eval("debug")
                .with_module("settings")
                .with_create_method("import_or_create"),
        ),
        json!(true)
    );
}

#[test]
fn create_does_not_run_registered_source() {
    let service = service();
    service
        .modules()
        .registry()
        .register("lazy", "print(\"ran\")\nvalue = 1", "/virtual/lazy.lpy");
    let response = ok(
        &service,
        Message::exec("pass")
            .with_module("lazy")
            .with_create_method("create"),
    );
    assert_eq!(response.stdout, "");
    let response = send(&service, Message::eval("value").with_module("lazy"));
    assert_eq!(response.kind, ResponseType::Error);
}

#[test]
fn cached_module_ignores_create_method() {
    let service = service();
    ok(
        &service,
        Message::exec("x = 1")
            .with_module("m")
            .with_create_method("create"),
    );
    let response = ok(
        &service,
        Message::eval("x")
            .with_module("m")
            .with_create_method("not-a-method"),
    );
    assert_eq!(response.result, Some(json!(1)));
}

#[test]
fn legacy_create_method_key_is_accepted() {
    let service = service();
    let message: Message = serde_json::from_value(json!({
        "type": "exec",
        "code": "ready = true",
        "module": "legacy",
        "module-create-method": "create"
    }))
    .expect("message");
    ok(&service, message);
    assert!(service.modules().lookup("legacy").is_some());
}

#[test]
fn packages_bind_submodules_on_parent() {
    let service = service();
    let registry = service.modules().registry();
    registry.register("pkg.__init__", "label = \"pkg\"", "/virtual/pkg/__init__.lpy");
    registry.register("pkg.sub", "value = 3", "/virtual/pkg/sub.lpy");

    ok(&service, Message::exec("import pkg.sub\nfrom pkg import sub as s"));
    assert_eq!(result_of(&service, Message::eval("pkg.sub.value + s.value")), json!(6));
    assert_eq!(result_of(&service, Message::eval("pkg.label")), json!("pkg"));
    assert_eq!(
        result_of(&service, Message::eval("pkg.__path__")),
        json!(["/virtual/pkg/"])
    );
    assert_eq!(
        result_of(&service, Message::eval("pkg.sub.__package__")),
        json!("pkg")
    );
}

#[test]
fn failed_load_keeps_partial_namespace() {
    let service = service();
    service
        .modules()
        .registry()
        .register("broken", "a = 1\nraise \"boom\"", "/virtual/broken.lpy");
    let response = send(&service, Message::exec("import broken"));
    assert_eq!(response.kind, ResponseType::Error);
    assert_eq!(response.error.as_deref(), Some("boom"));
    assert!(response.stderr.contains("(module: broken)"), "{}", response.stderr);

    assert_eq!(
        result_of(&service, Message::eval("a").with_module("broken")),
        json!(1)
    );
}

#[test]
fn file_resolver_runs_before_registry() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("tools.lpy"), "origin = \"file\"\n").expect("write");
    std::fs::create_dir(temp.path().join("kit")).expect("mkdir");
    std::fs::write(temp.path().join("kit").join("__init__.lpy"), "kind = \"package\"\n")
        .expect("write");

    let modules = ModuleSystem::with_search_paths(
        Arc::new(ScriptEvaluator::new()),
        vec![temp.path().to_path_buf()],
    );
    modules
        .registry()
        .register("tools", "origin = \"registry\"", "/virtual/tools.lpy");
    let service = ExecutionService::new(modules);

    assert_eq!(
        result_of(&service, Message::eval("origin").with_module("tools")),
        json!("file")
    );
    assert_eq!(
        result_of(&service, Message::eval("kind").with_module("kit")),
        json!("package")
    );
}

#[test]
fn cyclic_imports_see_partial_modules() {
    let service = service();
    let registry = service.modules().registry();
    registry.register("ping", "import pong\nname = \"ping\"", "/virtual/ping.lpy");
    registry.register(
        "pong",
        "import ping\nfn peer() { return ping.name }",
        "/virtual/pong.lpy",
    );
    ok(&service, Message::exec("import ping"));
    assert_eq!(result_of(&service, Message::eval("ping.pong.peer()")), json!("ping"));
}

#[test]
fn exec_into_module_propagates_to_dependents() {
    let service = service();
    ok(
        &service,
        Message::exec("x = 1\nfn shout(s) { return s.upper() }")
            .with_module("lib")
            .with_create_method("create"),
    );
    ok(
        &service,
        Message::exec("from lib import x\nfrom lib import shout as loud")
            .with_module("app")
            .with_create_method("create"),
    );
    ok(
        &service,
        Message::exec("from lib import *")
            .with_module("star")
            .with_create_method("create"),
    );

    let response = ok(
        &service,
        Message::exec("x = 2\nfn shout(s) { return s.upper() + \"!\" }").with_module("lib"),
    );
    let updates = response.updated_modules.expect("updates");
    assert_eq!(updates["app"], vec!["x".to_string(), "loud".to_string()]);
    let mut star = updates["star"].clone();
    star.sort();
    assert_eq!(star, vec!["shout".to_string(), "x".to_string()]);

    assert_eq!(
        result_of(&service, Message::eval("loud(\"hi\") + str(x)").with_module("app")),
        json!("HI!2")
    );
    assert_eq!(result_of(&service, Message::eval("x").with_module("star")), json!(2));
}

#[test]
fn exec_without_dependents_omits_updates() {
    let service = service();
    let response = ok(
        &service,
        Message::exec("x = 1")
            .with_module("alone")
            .with_create_method("create"),
    );
    assert!(response.updated_modules.is_none());
    let encoded = serde_json::to_value(&response).expect("encode");
    assert!(encoded.get("updated_modules").is_none());
}

#[test]
fn concurrent_requests_keep_output_separate() {
    let service = Arc::new(service());
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let service = service.clone();
            std::thread::spawn(move || {
                let code = format!("for i in range(50) {{ print(\"w{worker}\") }}");
                service.execute(&Message::exec(code)).response
            })
        })
        .collect();
    for (worker, handle) in handles.into_iter().enumerate() {
        let response = handle.join().expect("join");
        let expected = format!("w{worker}\n").repeat(50);
        assert_eq!(response.stdout, expected);
    }
}

#[test]
fn concurrent_create_yields_one_namespace() {
    let service = Arc::new(service());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            std::thread::spawn(move || {
                service.execute(
                    &Message::exec("pass")
                        .with_module("shared")
                        .with_create_method("create"),
                );
                service.modules().lookup("shared").expect("cached")
            })
        })
        .collect();
    let namespaces: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("join"))
        .collect();
    assert!(namespaces.iter().all(|ns| ns.ptr_eq(&namespaces[0])));
}
