//! Integration tests for the reqwest-backed transfer engine.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use courier_core::Notifier;
use courier_net::{
    Auth, ClientConfig, Context, Method, RequestOptions, RequestState, SessionOptions,
};

fn http_context() -> (Rc<Notifier>, Context) {
    let notifier = Rc::new(Notifier::new());
    let context = Context::http(notifier.clone(), ClientConfig::default()).unwrap();
    (notifier, context)
}

#[test]
fn test_invalid_url_fails_configuration() {
    let (_notifier, context) = http_context();

    let id = context
        .request(Method::Get, "not a url", RequestOptions::new())
        .unwrap();

    assert_eq!(context.state(id).unwrap(), RequestState::Error);
    assert!(context.error(id).unwrap().starts_with("failed to set url: "));
}

#[test]
fn test_unsupported_settings_are_reported() {
    let (_notifier, context) = http_context();

    let id = context
        .request(
            Method::Get,
            "http://127.0.0.1:9/",
            RequestOptions::new().verify_status(true),
        )
        .unwrap();

    assert_eq!(context.state(id).unwrap(), RequestState::Error);
    assert_eq!(
        context.error(id).unwrap(),
        "failed to set verify status: unsupported: certificate status verification"
    );
}

#[test]
fn test_connection_refused_is_a_transport_error() {
    let (_notifier, context) = http_context();

    let id = context
        .request(
            Method::Get,
            "http://127.0.0.1:9/",
            RequestOptions::new().connect_timeout(Duration::from_secs(2)),
        )
        .unwrap();

    assert_eq!(context.state(id).unwrap(), RequestState::Error);
    assert!(context.error(id).unwrap().starts_with("transport error: "));
    assert_eq!(context.status_code(id).unwrap(), 0);
}

// Note: We use wiremock for mocked HTTP tests
// These tests are conditionally compiled when the integration-tests feature is enabled
#[cfg(feature = "integration-tests")]
mod integration_tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// A mock server running on its own runtime, away from the event loop thread.
    struct Server {
        runtime: tokio::runtime::Runtime,
        server: MockServer,
    }

    impl Server {
        fn start() -> Self {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let server = runtime.block_on(MockServer::start());
            Self { runtime, server }
        }

        fn mount(&self, mock: Mock) {
            self.runtime.block_on(mock.mount(&self.server));
        }

        fn url(&self, route: &str) -> String {
            format!("{}{route}", self.server.uri())
        }
    }

    #[test]
    fn test_sync_get() {
        let server = Server::start();
        server.mount(
            Mock::given(method("GET"))
                .and(path("/hello"))
                .and(header("accept", "application/json"))
                .respond_with(
                    ResponseTemplate::new(200).set_body_raw(
                        r#"{"greeting":"héllo"}"#,
                        "application/json; charset=utf-8",
                    ),
                ),
        );
        let (_notifier, context) = http_context();

        let id = context
            .request(
                Method::Get,
                server.url("/hello"),
                RequestOptions::new().accept("json"),
            )
            .unwrap();

        assert_eq!(context.state(id).unwrap(), RequestState::Done);
        assert_eq!(context.status_code(id).unwrap(), 200);
        assert_eq!(context.encoding(id).unwrap(), "utf-8");
        assert_eq!(context.text(id).unwrap(), r#"{"greeting":"héllo"}"#);
    }

    #[test]
    fn test_error_status_is_not_a_failure() {
        let server = Server::start();
        server.mount(
            Mock::given(method("GET"))
                .and(path("/missing"))
                .respond_with(ResponseTemplate::new(404).set_body_string("not here")),
        );
        let (_notifier, context) = http_context();

        let id = context
            .request(Method::Get, server.url("/missing"), RequestOptions::new())
            .unwrap();

        assert_eq!(context.state(id).unwrap(), RequestState::Done);
        assert_eq!(context.status_code(id).unwrap(), 404);
        assert_eq!(context.text(id).unwrap(), "not here");
        assert_eq!(context.error(id).unwrap(), "");
    }

    #[test]
    fn test_post_body_and_basic_auth() {
        let server = Server::start();
        server.mount(
            Mock::given(method("POST"))
                .and(path("/submit"))
                .and(header("authorization", "Basic dXNlcjpwYXNz"))
                .and(body_string("a=1&b=2"))
                .respond_with(ResponseTemplate::new(201)),
        );
        let (_notifier, context) = http_context();

        let id = context
            .request(
                Method::Post,
                server.url("/submit"),
                RequestOptions::new()
                    .auth(Auth::basic("user", "pass"))
                    .data("a=1&b=2"),
            )
            .unwrap();

        assert_eq!(context.status_code(id).unwrap(), 201);
    }

    #[test]
    fn test_async_requests_call_back() {
        let server = Server::start();
        for route in ["/one", "/two"] {
            server.mount(
                Mock::given(method("GET"))
                    .and(path(route))
                    .respond_with(
                        ResponseTemplate::new(200)
                            .set_body_string(route)
                            .set_delay(Duration::from_millis(20)),
                    ),
            );
        }
        let (notifier, context) = http_context();
        let finished = Rc::new(RefCell::new(Vec::new()));

        for route in ["/one", "/two"] {
            let finished = finished.clone();
            context
                .request(
                    Method::Get,
                    server.url(route),
                    RequestOptions::new().asynchronous().callback(move |context, id| {
                        finished.borrow_mut().push(context.text(id).unwrap());
                    }),
                )
                .unwrap();
        }
        assert_eq!(context.pool_status().unwrap().active, 2);

        assert!(notifier.run_until(|| finished.borrow().len() == 2, Duration::from_secs(10)));

        let mut texts = finished.borrow().clone();
        texts.sort();
        assert_eq!(texts, vec!["/one", "/two"]);
        let status = context.pool_status().unwrap();
        assert_eq!(status.members, 0);
        assert_eq!(status.active, 0);
    }

    #[test]
    fn test_session_keeps_cookies() {
        let server = Server::start();
        server.mount(
            Mock::given(method("GET"))
                .and(path("/login"))
                .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "token=abc; Path=/")),
        );
        server.mount(
            Mock::given(method("GET"))
                .and(path("/whoami"))
                .and(header("cookie", "token=abc"))
                .respond_with(ResponseTemplate::new(200).set_body_string("alice")),
        );
        let (_notifier, context) = http_context();
        let session = context.create_session(SessionOptions::new()).unwrap();

        context
            .session_request(session, Method::Get, server.url("/login"), RequestOptions::new())
            .unwrap();
        let id = context
            .session_request(session, Method::Get, server.url("/whoami"), RequestOptions::new())
            .unwrap();
        assert_eq!(context.text(id).unwrap(), "alice");

        let outsider = context
            .request(Method::Get, server.url("/whoami"), RequestOptions::new())
            .unwrap();
        assert_eq!(context.status_code(outsider).unwrap(), 404);
    }

    #[test]
    fn test_free_in_flight_request() {
        let server = Server::start();
        server.mount(
            Mock::given(method("GET"))
                .and(path("/slow"))
                .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5))),
        );
        let (notifier, context) = http_context();
        let calls = Rc::new(RefCell::new(0));

        let counter = calls.clone();
        let id = context
            .request(
                Method::Get,
                server.url("/slow"),
                RequestOptions::new()
                    .asynchronous()
                    .callback(move |_, _| *counter.borrow_mut() += 1),
            )
            .unwrap();
        notifier.do_one_event(Duration::from_millis(10));

        assert!(context.free_request(id));
        assert!(!notifier.run_until(|| *calls.borrow() > 0, Duration::from_millis(200)));
        assert_eq!(context.pool_status().unwrap().members, 0);
    }
}
