//! Tests for string commands on exposed request and session handles.

use std::rc::Rc;

use courier_core::Notifier;
use courier_net::testing::{ScriptedEngine, ScriptedResponse};
use courier_net::{
    ClientConfig, CommandError, Context, HandleTarget, Method, Mode, Reply, RequestError,
    RequestOptions, SessionOptions,
};

const URL: &str = "http://example.test/items";

fn context() -> (ScriptedEngine, Context) {
    let engine = ScriptedEngine::new();
    engine.respond(
        URL,
        ScriptedResponse::ok("caf\u{e9}")
            .with_status(202)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_header("Set-Cookie", "a=1")
            .with_header("Set-Cookie", "b=2"),
    );
    let context = Context::new(engine.clone(), Rc::new(Notifier::new()), ClientConfig::default());
    (engine, context)
}

fn exposed_request(context: &Context) -> String {
    let id = context.request(Method::Get, URL, RequestOptions::new()).unwrap();
    context.expose_request(id).unwrap()
}

#[test]
fn test_request_commands() {
    let (_engine, context) = context();
    let handle = exposed_request(&context);

    assert_eq!(context.invoke(&handle, &["text"]).unwrap(), Reply::Text("café".into()));
    assert_eq!(
        context.invoke(&handle, &["content"]).unwrap(),
        Reply::Bytes("café".as_bytes().to_vec())
    );
    assert_eq!(context.invoke(&handle, &["status_code"]).unwrap(), Reply::Int(202));
    assert_eq!(context.invoke(&handle, &["state"]).unwrap(), Reply::Text("done".into()));
    assert_eq!(context.invoke(&handle, &["error"]).unwrap(), Reply::Text(String::new()));
    assert_eq!(
        context.invoke(&handle, &["header", "content-type"]).unwrap(),
        Reply::Text("text/plain; charset=utf-8".into())
    );
    assert_eq!(
        context.invoke(&handle, &["header", "SET-COOKIE"]).unwrap(),
        Reply::Values(vec!["a=1".into(), "b=2".into()])
    );

    let Reply::Headers(headers) = context.invoke(&handle, &["headers"]).unwrap() else {
        panic!("expected headers");
    };
    assert_eq!(headers.get("set-cookie"), Some("b=2"));
}

#[test]
fn test_encoding_command() {
    let (_engine, context) = context();
    let handle = exposed_request(&context);

    assert_eq!(
        context.invoke(&handle, &["encoding"]).unwrap(),
        Reply::Text("utf-8".into())
    );
    assert_eq!(
        context.invoke(&handle, &["encoding", "iso8859-1"]).unwrap(),
        Reply::Text("iso8859-1".into())
    );
    assert_eq!(
        context.invoke(&handle, &["text"]).unwrap(),
        Reply::Text("caf\u{c3}\u{a9}".into())
    );

    let err = context.invoke(&handle, &["encoding", "klingon"]).unwrap_err();
    assert_eq!(err.to_string(), "unknown encoding \"klingon\"");
}

#[test]
fn test_missing_header() {
    let (_engine, context) = context();
    let handle = exposed_request(&context);

    let err = context.invoke(&handle, &["header", "x-missing"]).unwrap_err();
    assert_eq!(err, CommandError::HeaderNotFound("x-missing".into()));
    assert_eq!(
        err.to_string(),
        "there is no header \"x-missing\" in the server response"
    );
}

#[test]
fn test_arity_errors() {
    let (_engine, context) = context();
    let handle = exposed_request(&context);

    let err = context.invoke(&handle, &[]).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("wrong # args: should be \"{handle} option ?arg ...?\"")
    );

    let err = context.invoke(&handle, &["header"]).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("wrong # args: should be \"{handle} header name\"")
    );

    let err = context.invoke(&handle, &["text", "extra"]).unwrap_err();
    assert_eq!(err.to_string(), format!("wrong # args: should be \"{handle} text\""));
}

#[test]
fn test_unknown_command() {
    let (_engine, context) = context();
    let handle = exposed_request(&context);

    let err = context.invoke(&handle, &["json"]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "bad command \"json\": must be text, content, error, headers, header, encoding, \
         status_code, state, or destroy"
    );
}

#[test]
fn test_destroy_retracts_handle() {
    let (_engine, context) = context();
    let handle = exposed_request(&context);
    let Some(HandleTarget::Request(id)) = context.resolve_handle(&handle) else {
        panic!("handle does not name a request");
    };

    assert_eq!(context.invoke(&handle, &["destroy"]).unwrap(), Reply::Empty);

    assert!(!context.contains_request(id));
    assert_eq!(
        context.invoke(&handle, &["text"]).unwrap_err(),
        CommandError::UnknownHandle(handle.clone())
    );
}

#[test]
fn test_expose_is_stable() {
    let (_engine, context) = context();
    let id = context.request(Method::Get, URL, RequestOptions::new()).unwrap();

    let first = context.expose_request(id).unwrap();
    assert_eq!(context.expose_request(id).unwrap(), first);
    assert!(first.starts_with("courier::request::handle"));

    context.free_request(id);
    assert!(context.resolve_handle(&first).is_none());
    assert_eq!(context.expose_request(id), Err(RequestError::UnknownRequest));
}

#[test]
fn test_session_issues_requests() {
    let (engine, context) = context();
    let session = context.create_session(SessionOptions::new()).unwrap();
    let handle = context.expose_session(session).unwrap();
    assert!(handle.starts_with("courier::session::handle"));

    let Reply::Handle(request) = context.invoke(&handle, &["post", URL]).unwrap() else {
        panic!("expected a request handle");
    };
    assert_eq!(context.invoke(&request, &["text"]).unwrap(), Reply::Text("café".into()));
    assert!(engine.options(0).iter().any(|o| o.name() == "share"));

    let Reply::Handle(custom) = context.invoke(&handle, &["request", "PURGE", URL]).unwrap() else {
        panic!("expected a request handle");
    };
    let Some(HandleTarget::Request(id)) = context.resolve_handle(&custom) else {
        panic!("handle does not name a request");
    };
    assert_eq!(
        context.with_request(id, |r| r.method().clone()).unwrap(),
        Method::Custom("PURGE".into())
    );
    assert_eq!(context.with_session(session, |s| s.request_count()).unwrap(), 2);
}

#[test]
fn test_session_simple_mode_returns_text() {
    let (_engine, context) = context();
    let session = context.create_session(SessionOptions::new()).unwrap();
    let handle = context.expose_session(session).unwrap();

    let reply = context
        .invoke_with(&handle, &["get", URL], RequestOptions::new().mode(Mode::Simple))
        .unwrap();

    assert_eq!(reply, Reply::Text("café".into()));
    assert_eq!(context.request_count(), 0);
}

#[test]
fn test_session_command_errors() {
    let (_engine, context) = context();
    let session = context.create_session(SessionOptions::new()).unwrap();
    let handle = context.expose_session(session).unwrap();

    let err = context.invoke(&handle, &[]).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("wrong # args: should be \"{handle} method url\"")
    );

    let err = context.invoke(&handle, &["get"]).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("wrong # args: should be \"{handle} get url\"")
    );

    let err = context.invoke(&handle, &["get", URL, "-timeout"]).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("wrong # args: should be \"{handle} get url\"")
    );

    let err = context.invoke(&handle, &["request", "GET"]).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("wrong # args: should be \"{handle} request method url\"")
    );

    let err = context.invoke(&handle, &["fetch", URL]).unwrap_err();
    assert!(matches!(err, CommandError::UnknownCommand { .. }));
    assert!(err.to_string().ends_with("request, or destroy"));
}

#[test]
fn test_session_destroy_frees_requests_and_handles() {
    let (_engine, context) = context();
    let session = context.create_session(SessionOptions::new()).unwrap();
    let handle = context.expose_session(session).unwrap();
    let Reply::Handle(request) = context.invoke(&handle, &["get", URL]).unwrap() else {
        panic!("expected a request handle");
    };

    context.invoke(&handle, &["destroy"]).unwrap();

    assert!(context.resolve_handle(&handle).is_none());
    assert!(context.resolve_handle(&request).is_none());
    assert_eq!(context.request_count(), 0);
    assert_eq!(context.session_count(), 0);
}
