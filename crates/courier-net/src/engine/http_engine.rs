//! Transfer engine backed by reqwest.
//!
//! Each transfer is turned into a reqwest request when it is performed or
//! registered with a multiplexer. Registered transfers run as tasks on the
//! shared runtime and report back through a channel; the multiplexer's
//! non-blocking `perform` only drains that channel.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use courier_core::LoopWaker;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use super::runtime;
use super::{
    Completion, DebugSink, Engine, Multi, ShareHandle, Token, TraceKind, Transfer, TransferOption,
    WriteSink,
};
use crate::auth::AuthScheme;
use crate::config::ClientConfig;
use crate::error::EngineError;
use crate::logging;
use crate::request::Method;

/// Client-level settings; transfers agreeing on these share a client and
/// therefore its connection pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ClientKey {
    follow_redirects: bool,
    accept_invalid_certs: bool,
    connect_timeout: Option<Duration>,
    verbose: bool,
    cookies: bool,
}

type ClientCache = Mutex<HashMap<ClientKey, reqwest::Client>>;

struct EngineShared {
    config: ClientConfig,
    runtime: &'static Runtime,
    clients: ClientCache,
}

impl EngineShared {
    fn client(&self, key: ClientKey, share: Option<&HttpShare>) -> Result<reqwest::Client, EngineError> {
        let cache = share.map_or(&self.clients, |share| &share.clients);
        if let Some(client) = cache.lock().get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(self.config.user_agent.as_str())
            .danger_accept_invalid_certs(key.accept_invalid_certs)
            .connection_verbose(key.verbose);

        builder = if key.follow_redirects {
            builder.redirect(Policy::limited(self.config.max_redirects))
        } else {
            builder.redirect(Policy::none())
        };

        if let Some(timeout) = key.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        if let Some(share) = share.filter(|_| key.cookies) {
            builder = builder.cookie_provider(share.jar.clone());
        }

        let client = builder.build()?;
        tracing::debug!(target: logging::ENGINE, ?key, shared = share.is_some(), "created HTTP client");
        cache.lock().insert(key, client.clone());
        Ok(client)
    }
}

/// Cache shared by the transfers of one session: cookies plus clients
/// (and with them, pooled connections and TLS sessions).
struct HttpShare {
    jar: Arc<Jar>,
    clients: ClientCache,
}

/// A transfer engine that performs requests with reqwest.
///
/// # Example
///
/// ```ignore
/// use courier_net::{ClientConfig, HttpEngine};
///
/// let engine = HttpEngine::new(ClientConfig::default())?;
/// ```
#[derive(Clone)]
pub struct HttpEngine {
    shared: Arc<EngineShared>,
}

impl HttpEngine {
    /// Create an engine, starting the transfer runtime if needed.
    pub fn new(config: ClientConfig) -> Result<Self, EngineError> {
        let runtime = runtime::init(config.worker_threads)?;
        Ok(Self {
            shared: Arc::new(EngineShared {
                config,
                runtime,
                clients: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// The engine's configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for HttpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEngine")
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Engine for HttpEngine {
    fn create_transfer(&self) -> Result<Box<dyn Transfer>, EngineError> {
        Ok(Box::new(HttpTransfer {
            engine: self.shared.clone(),
            plan: TransferPlan::default(),
            state: Arc::new(Mutex::new(TransferState::default())),
        }))
    }

    fn create_multi(&self) -> Result<Box<dyn Multi>, EngineError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        Ok(Box::new(HttpMulti {
            runtime: self.shared.runtime,
            tx,
            rx,
            jobs: HashMap::new(),
            running: HashSet::new(),
            inbox: VecDeque::new(),
            done: VecDeque::new(),
            waker: Arc::new(Mutex::new(None)),
        }))
    }

    fn create_share(&self) -> Result<ShareHandle, EngineError> {
        Ok(ShareHandle::new(HttpShare {
            jar: Arc::new(Jar::default()),
            clients: Mutex::new(HashMap::new()),
        }))
    }
}

#[derive(Clone, Debug, Default)]
enum PlanBody {
    #[default]
    None,
    Raw(Bytes),
    Form(Vec<(String, String)>),
}

/// Everything the configuration calls have set so far.
#[derive(Clone, Debug)]
struct TransferPlan {
    url: Option<String>,
    method: Method,
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    scheme: Option<AuthScheme>,
    body: PlanBody,
    follow_redirects: bool,
    verbose: bool,
    headers: Vec<String>,
    connect_timeout: Option<Duration>,
    timeout: Option<Duration>,
    verify_peer: bool,
    share: Option<ShareHandle>,
    cookies: bool,
}

impl Default for TransferPlan {
    fn default() -> Self {
        Self {
            url: None,
            method: Method::Get,
            username: None,
            password: None,
            token: None,
            scheme: None,
            body: PlanBody::None,
            follow_redirects: false,
            verbose: false,
            headers: Vec::new(),
            connect_timeout: None,
            timeout: None,
            verify_peer: true,
            share: None,
            cookies: false,
        }
    }
}

/// State written by the running task and read by the owning thread.
#[derive(Default)]
struct TransferState {
    sink: Option<WriteSink>,
    debug: Option<DebugSink>,
    status: u16,
    headers: Vec<(String, String)>,
}

struct HttpTransfer {
    engine: Arc<EngineShared>,
    plan: TransferPlan,
    state: Arc<Mutex<TransferState>>,
}

impl HttpTransfer {
    /// Build the request future. Fails without side effects on bad settings.
    fn prepare(
        &mut self,
    ) -> Result<impl Future<Output = Result<(), EngineError>> + Send + 'static, EngineError> {
        let plan = &self.plan;
        let url = plan
            .url
            .clone()
            .ok_or_else(|| EngineError::InvalidValue("no URL set".to_string()))?;
        let method = reqwest_method(&plan.method)?;
        let headers = parse_header_lines(&plan.headers)?;

        let share = match &plan.share {
            Some(handle) => Some(
                handle
                    .downcast_ref::<HttpShare>()
                    .ok_or(EngineError::ForeignTransfer)?,
            ),
            None => None,
        };
        let key = ClientKey {
            follow_redirects: plan.follow_redirects,
            accept_invalid_certs: !plan.verify_peer,
            connect_timeout: plan.connect_timeout,
            verbose: plan.verbose,
            cookies: plan.cookies,
        };
        let client = self.engine.client(key, share)?;

        let mut builder = client.request(method.clone(), url.as_str()).headers(headers);

        let schemes = plan.scheme.map(AuthScheme::schemes);
        let allows = |scheme: AuthScheme| schemes.is_none_or(|s| s.contains(scheme));
        if let Some(token) = plan.token.as_ref().filter(|_| allows(AuthScheme::BEARER)) {
            builder = builder.bearer_auth(token);
        } else if let Some(user) = plan.username.as_ref().filter(|_| allows(AuthScheme::BASIC)) {
            builder = builder.basic_auth(user, plan.password.as_ref());
        }

        builder = match &plan.body {
            PlanBody::None => builder,
            PlanBody::Raw(data) => builder.body(data.clone()),
            PlanBody::Form(fields) => {
                let form = fields
                    .iter()
                    .fold(reqwest::multipart::Form::new(), |form, (name, value)| {
                        form.text(name.clone(), value.clone())
                    });
                builder.multipart(form)
            }
        };

        if let Some(timeout) = plan.timeout {
            builder = builder.timeout(timeout);
        }

        let trace = {
            let mut state = self.state.lock();
            state.status = 0;
            state.headers.clear();
            state.debug.clone().filter(|_| plan.verbose)
        };
        if let Some(trace) = &trace {
            trace(TraceKind::Text, format!("{method} {url}").as_bytes());
            for line in &plan.headers {
                trace(TraceKind::HeaderOut, line.as_bytes());
            }
            if let PlanBody::Raw(data) = &plan.body {
                trace(TraceKind::DataOut, data);
            }
        }

        Ok(execute(builder, trace, self.state.clone()))
    }
}

async fn execute(
    builder: reqwest::RequestBuilder,
    trace: Option<DebugSink>,
    state: Arc<Mutex<TransferState>>,
) -> Result<(), EngineError> {
    let mut response = builder.send().await?;

    let status = response.status().as_u16();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    if let Some(trace) = &trace {
        trace(TraceKind::HeaderIn, format!("{:?} {}", response.version(), response.status()).as_bytes());
        for (name, value) in &headers {
            trace(TraceKind::HeaderIn, format!("{name}: {value}").as_bytes());
        }
    }

    {
        let mut state = state.lock();
        state.status = status;
        state.headers = headers;
    }

    while let Some(chunk) = response.chunk().await? {
        if let Some(trace) = &trace {
            trace(TraceKind::DataIn, &chunk);
        }
        let mut state = state.lock();
        if let Some(sink) = state.sink.as_mut() {
            sink(&chunk)?;
        }
    }

    Ok(())
}

fn reqwest_method(method: &Method) -> Result<reqwest::Method, EngineError> {
    Ok(match method {
        Method::Head => reqwest::Method::HEAD,
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Custom(verb) => reqwest::Method::from_bytes(verb.as_bytes())
            .map_err(|_| EngineError::InvalidValue(format!("invalid method \"{verb}\"")))?,
    })
}

fn parse_header_lines(lines: &[String]) -> Result<HeaderMap, EngineError> {
    let mut headers = HeaderMap::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| EngineError::InvalidValue(format!("malformed header line \"{line}\"")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| EngineError::InvalidValue(format!("invalid header name \"{name}\"")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| EngineError::InvalidValue(format!("invalid value for header \"{name}\"")))?;
        headers.append(name, value);
    }
    Ok(headers)
}

impl Transfer for HttpTransfer {
    fn set_option(&mut self, option: TransferOption) -> Result<(), EngineError> {
        let plan = &mut self.plan;
        match option {
            TransferOption::Url(url) => {
                url::Url::parse(&url).map_err(|e| EngineError::InvalidValue(e.to_string()))?;
                plan.url = Some(url);
            }
            TransferOption::Method(method) => {
                reqwest_method(&method)?;
                plan.method = method;
            }
            TransferOption::Username(username) => plan.username = Some(username),
            TransferOption::Password(password) => plan.password = Some(password),
            TransferOption::BearerToken(token) => plan.token = Some(token),
            TransferOption::AwsSigV4(_) => {
                return Err(EngineError::Unsupported(
                    "AWS SigV4 request signing".to_string(),
                ));
            }
            TransferOption::AuthScheme(scheme) => {
                let schemes = scheme.schemes();
                if !schemes.contains(AuthScheme::BASIC) && !schemes.contains(AuthScheme::BEARER) {
                    return Err(EngineError::Unsupported(format!(
                        "authentication scheme {scheme:?}"
                    )));
                }
                plan.scheme = Some(scheme);
            }
            TransferOption::MultipartForm(fields) => plan.body = PlanBody::Form(fields),
            TransferOption::PostFields(data) => plan.body = PlanBody::Raw(data),
            TransferOption::FollowRedirects(follow) => plan.follow_redirects = follow,
            TransferOption::Verbose(verbose) => plan.verbose = verbose,
            TransferOption::Headers(lines) => {
                parse_header_lines(&lines)?;
                plan.headers = lines;
            }
            TransferOption::ConnectTimeout(timeout) => plan.connect_timeout = Some(timeout),
            TransferOption::Timeout(timeout) => plan.timeout = Some(timeout),
            TransferOption::VerifyPeer(verify) => plan.verify_peer = verify,
            TransferOption::VerifyHost(verify) => {
                if !verify && plan.verify_peer {
                    return Err(EngineError::Unsupported(
                        "disabling host name verification while verifying certificates"
                            .to_string(),
                    ));
                }
            }
            TransferOption::VerifyStatus(verify) => {
                if verify {
                    return Err(EngineError::Unsupported(
                        "certificate status verification".to_string(),
                    ));
                }
            }
            TransferOption::Share(share) => {
                if share.downcast_ref::<HttpShare>().is_none() {
                    return Err(EngineError::InvalidValue(
                        "share handle from a different engine".to_string(),
                    ));
                }
                plan.share = Some(share);
            }
            TransferOption::CookieEngine(enabled) => plan.cookies = enabled,
        }
        Ok(())
    }

    fn set_write_sink(&mut self, sink: WriteSink) {
        self.state.lock().sink = Some(sink);
    }

    fn set_debug_sink(&mut self, sink: Option<DebugSink>) {
        self.state.lock().debug = sink;
    }

    fn perform(&mut self) -> Result<(), EngineError> {
        let job = self.prepare()?;
        self.engine.runtime.block_on(job)
    }

    fn response_code(&self) -> u16 {
        self.state.lock().status
    }

    fn response_headers(&self) -> Vec<(String, String)> {
        self.state.lock().headers.clone()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Multiplexer running registered transfers as runtime tasks.
struct HttpMulti {
    runtime: &'static Runtime,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    /// Every registered transfer, finished or not.
    jobs: HashMap<Token, JoinHandle<()>>,
    /// Registered transfers whose completion has not been performed yet.
    running: HashSet<Token>,
    /// Completions received by `poll`, not yet performed.
    inbox: VecDeque<Completion>,
    /// Performed completions awaiting `info_read`.
    done: VecDeque<Completion>,
    waker: Arc<Mutex<Option<LoopWaker>>>,
}

impl Multi for HttpMulti {
    fn add(&mut self, token: Token, transfer: &mut dyn Transfer) -> Result<(), EngineError> {
        if self.jobs.contains_key(&token) {
            return Err(EngineError::InvalidValue(format!(
                "transfer {token:?} is already registered"
            )));
        }
        let transfer = transfer
            .as_any_mut()
            .downcast_mut::<HttpTransfer>()
            .ok_or(EngineError::ForeignTransfer)?;
        let job = transfer.prepare()?;

        let tx = self.tx.clone();
        let waker = self.waker.clone();
        let handle = self.runtime.spawn(async move {
            let result = job.await;
            if tx.send(Completion { token, result }).is_ok() {
                if let Some(waker) = waker.lock().as_ref() {
                    waker.wake();
                }
            }
        });

        self.jobs.insert(token, handle);
        self.running.insert(token);
        tracing::trace!(target: logging::ENGINE, ?token, "transfer registered");
        Ok(())
    }

    fn remove(&mut self, token: Token, _transfer: &mut dyn Transfer) -> Result<(), EngineError> {
        let handle = self.jobs.remove(&token).ok_or(EngineError::NotRegistered)?;
        handle.abort();
        self.running.remove(&token);
        self.inbox.retain(|c| c.token != token);
        self.done.retain(|c| c.token != token);
        tracing::trace!(target: logging::ENGINE, ?token, "transfer deregistered");
        Ok(())
    }

    fn perform(&mut self) -> Result<usize, EngineError> {
        self.inbox.extend(self.rx.try_iter());
        while let Some(completion) = self.inbox.pop_front() {
            // Completions of removed transfers are stale.
            if self.running.remove(&completion.token) {
                self.done.push_back(completion);
            }
        }
        Ok(self.running.len())
    }

    fn timeout(&self) -> Option<Duration> {
        if !self.inbox.is_empty() || !self.rx.is_empty() {
            Some(Duration::ZERO)
        } else {
            None
        }
    }

    fn poll(&mut self, timeout: Duration) -> Result<usize, EngineError> {
        if self.inbox.is_empty() && self.rx.is_empty() && !self.running.is_empty() {
            if let Ok(completion) = self.rx.recv_timeout(timeout) {
                self.inbox.push_back(completion);
            }
        }
        self.inbox.extend(self.rx.try_iter());
        Ok(self.inbox.len())
    }

    fn info_read(&mut self) -> Option<Completion> {
        self.done.pop_front()
    }

    fn set_waker(&mut self, waker: LoopWaker) {
        *self.waker.lock() = Some(waker);
    }
}

impl Drop for HttpMulti {
    fn drop(&mut self) {
        for (_, handle) in self.jobs.drain() {
            handle.abort();
        }
    }
}
