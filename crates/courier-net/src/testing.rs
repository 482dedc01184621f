//! A scripted, in-memory transfer engine.
//!
//! [`ScriptedEngine`] records every configuration call made on its
//! transfers and serves canned responses per URL. Its multiplexer finishes
//! transfers only when told to, and its deadline hint and readiness count
//! are settable, which makes pool behavior deterministic in tests.
//!
//! ```
//! use courier_net::testing::{ScriptedEngine, ScriptedResponse};
//!
//! let engine = ScriptedEngine::new();
//! engine.respond("http://example.test/", ScriptedResponse::ok("hello"));
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use courier_core::LoopWaker;

use crate::engine::{
    Completion, DebugSink, Engine, Multi, ShareHandle, Token, TraceKind, Transfer, TransferOption,
    WriteSink,
};
use crate::error::EngineError;

/// A canned response.
#[derive(Clone, Debug)]
pub struct ScriptedResponse {
    /// Status code.
    pub status: u16,
    /// Response headers in order.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
    /// Transport failure reported instead of a response.
    pub error: Option<EngineError>,
}

impl Default for ScriptedResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
            error: None,
        }
    }
}

impl ScriptedResponse {
    /// A 200 response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// A transport failure with the given message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            error: Some(EngineError::Transport(message.into())),
            ..Default::default()
        }
    }

    /// Set the status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Append a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Default)]
struct TransferRecord {
    options: Vec<TransferOption>,
    url: Option<String>,
    sink: Option<WriteSink>,
    debug: Option<DebugSink>,
    status: u16,
    headers: Vec<(String, String)>,
    performed: usize,
}

impl TransferRecord {
    fn deliver(&mut self, response: &ScriptedResponse) -> Result<(), EngineError> {
        self.status = response.status;
        self.headers = response.headers.clone();
        if let Some(debug) = &self.debug {
            debug(TraceKind::Text, self.url.as_deref().unwrap_or_default().as_bytes());
        }
        if let Some(error) = &response.error {
            return Err(error.clone());
        }
        if let Some(sink) = self.sink.as_mut() {
            if !response.body.is_empty() {
                sink(&response.body)?;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct Script {
    responses: HashMap<String, ScriptedResponse>,
    fail_option: Option<&'static str>,
    fail_add: bool,
    hint: Option<Duration>,
    ready: Option<usize>,
    transfers: Vec<Rc<RefCell<TransferRecord>>>,
    registered: HashMap<Token, Rc<RefCell<TransferRecord>>>,
    running: HashSet<Token>,
    finishing: Vec<Token>,
    done: VecDeque<Completion>,
    multi_perform_calls: usize,
    poll_calls: usize,
    shares: usize,
}

impl Script {
    fn response_for(&self, url: Option<&str>) -> ScriptedResponse {
        url.and_then(|url| self.responses.get(url))
            .cloned()
            .unwrap_or_default()
    }
}

/// In-memory engine driven by the test.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    script: Rc<RefCell<Script>>,
}

impl ScriptedEngine {
    /// Create an engine that answers every URL with an empty 200.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for `url`.
    pub fn respond(&self, url: impl Into<String>, response: ScriptedResponse) {
        self.script.borrow_mut().responses.insert(url.into(), response);
    }

    /// Make every configuration call of the named option fail.
    pub fn fail_option(&self, name: &'static str) {
        self.script.borrow_mut().fail_option = Some(name);
    }

    /// Make multiplexer registration fail.
    pub fn fail_add(&self, fail: bool) {
        self.script.borrow_mut().fail_add = fail;
    }

    /// Set the multiplexer's deadline hint.
    pub fn set_timeout_hint(&self, hint: Option<Duration>) {
        self.script.borrow_mut().hint = hint;
    }

    /// Override the readiness count reported by `poll`.
    ///
    /// By default `poll` reports the number of transfers marked to finish.
    pub fn set_ready(&self, ready: Option<usize>) {
        self.script.borrow_mut().ready = ready;
    }

    /// Finish every registered transfer for `url` on the next step.
    ///
    /// Returns how many transfers were marked.
    pub fn complete(&self, url: &str) -> usize {
        let mut script = self.script.borrow_mut();
        let tokens: Vec<Token> = script
            .registered
            .iter()
            .filter(|(token, record)| {
                script.running.contains(token) && record.borrow().url.as_deref() == Some(url)
            })
            .map(|(token, _)| *token)
            .collect();
        let count = tokens.len();
        script.finishing.extend(tokens);
        count
    }

    /// Finish every registered transfer on the next step.
    pub fn complete_all(&self) -> usize {
        let mut script = self.script.borrow_mut();
        let tokens: Vec<Token> = script.running.iter().copied().collect();
        let count = tokens.len();
        script.finishing.extend(tokens);
        count
    }

    /// Number of transfers currently registered with the multiplexer.
    pub fn registered_count(&self) -> usize {
        self.script.borrow().registered.len()
    }

    /// Number of non-blocking steps performed by the multiplexer.
    pub fn perform_calls(&self) -> usize {
        self.script.borrow().multi_perform_calls
    }

    /// Number of readiness polls performed by the multiplexer.
    pub fn poll_calls(&self) -> usize {
        self.script.borrow().poll_calls
    }

    /// Number of shared caches created.
    pub fn share_count(&self) -> usize {
        self.script.borrow().shares
    }

    /// Number of transfers created.
    pub fn transfer_count(&self) -> usize {
        self.script.borrow().transfers.len()
    }

    /// Names of the options set on the `index`-th transfer, in call order.
    pub fn option_names(&self, index: usize) -> Vec<&'static str> {
        self.options(index).iter().map(TransferOption::name).collect()
    }

    /// Options set on the `index`-th transfer, in call order.
    pub fn options(&self, index: usize) -> Vec<TransferOption> {
        self.script
            .borrow()
            .transfers
            .get(index)
            .map(|record| record.borrow().options.clone())
            .unwrap_or_default()
    }

    /// How many times the `index`-th transfer was performed synchronously.
    pub fn performed(&self, index: usize) -> usize {
        self.script
            .borrow()
            .transfers
            .get(index)
            .map_or(0, |record| record.borrow().performed)
    }
}

impl Engine for ScriptedEngine {
    fn create_transfer(&self) -> Result<Box<dyn Transfer>, EngineError> {
        let record = Rc::new(RefCell::new(TransferRecord::default()));
        self.script.borrow_mut().transfers.push(record.clone());
        Ok(Box::new(ScriptedTransfer {
            script: self.script.clone(),
            record,
        }))
    }

    fn create_multi(&self) -> Result<Box<dyn Multi>, EngineError> {
        Ok(Box::new(ScriptedMulti {
            script: self.script.clone(),
        }))
    }

    fn create_share(&self) -> Result<ShareHandle, EngineError> {
        let mut script = self.script.borrow_mut();
        script.shares += 1;
        Ok(ShareHandle::new(script.shares))
    }
}

struct ScriptedTransfer {
    script: Rc<RefCell<Script>>,
    record: Rc<RefCell<TransferRecord>>,
}

impl Transfer for ScriptedTransfer {
    fn set_option(&mut self, option: TransferOption) -> Result<(), EngineError> {
        let name = option.name();
        let mut record = self.record.borrow_mut();
        if let TransferOption::Url(url) = &option {
            record.url = Some(url.clone());
        }
        record.options.push(option);
        if self.script.borrow().fail_option == Some(name) {
            return Err(EngineError::InvalidValue(format!("scripted failure of {name}")));
        }
        Ok(())
    }

    fn set_write_sink(&mut self, sink: WriteSink) {
        self.record.borrow_mut().sink = Some(sink);
    }

    fn set_debug_sink(&mut self, sink: Option<DebugSink>) {
        self.record.borrow_mut().debug = sink;
    }

    fn perform(&mut self) -> Result<(), EngineError> {
        let mut record = self.record.borrow_mut();
        record.performed += 1;
        let response = self.script.borrow().response_for(record.url.as_deref());
        record.deliver(&response)
    }

    fn response_code(&self) -> u16 {
        self.record.borrow().status
    }

    fn response_headers(&self) -> Vec<(String, String)> {
        self.record.borrow().headers.clone()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct ScriptedMulti {
    script: Rc<RefCell<Script>>,
}

impl Multi for ScriptedMulti {
    fn add(&mut self, token: Token, transfer: &mut dyn Transfer) -> Result<(), EngineError> {
        let transfer = transfer
            .as_any_mut()
            .downcast_mut::<ScriptedTransfer>()
            .ok_or(EngineError::ForeignTransfer)?;
        let mut script = self.script.borrow_mut();
        if script.fail_add {
            return Err(EngineError::Transport("scripted registration failure".to_string()));
        }
        script.registered.insert(token, transfer.record.clone());
        script.running.insert(token);
        Ok(())
    }

    fn remove(&mut self, token: Token, _transfer: &mut dyn Transfer) -> Result<(), EngineError> {
        let mut script = self.script.borrow_mut();
        script
            .registered
            .remove(&token)
            .ok_or(EngineError::NotRegistered)?;
        script.running.remove(&token);
        script.finishing.retain(|t| *t != token);
        script.done.retain(|c| c.token != token);
        Ok(())
    }

    fn perform(&mut self) -> Result<usize, EngineError> {
        let mut script = self.script.borrow_mut();
        script.multi_perform_calls += 1;
        let finishing = std::mem::take(&mut script.finishing);
        for token in finishing {
            if !script.running.remove(&token) {
                continue;
            }
            let Some(record) = script.registered.get(&token).cloned() else {
                continue;
            };
            let response = script.response_for(record.borrow().url.as_deref());
            let result = record.borrow_mut().deliver(&response);
            script.done.push_back(Completion { token, result });
        }
        Ok(script.running.len())
    }

    fn timeout(&self) -> Option<Duration> {
        self.script.borrow().hint
    }

    fn poll(&mut self, _timeout: Duration) -> Result<usize, EngineError> {
        let mut script = self.script.borrow_mut();
        script.poll_calls += 1;
        Ok(script.ready.unwrap_or(script.finishing.len()))
    }

    fn info_read(&mut self) -> Option<Completion> {
        self.script.borrow_mut().done.pop_front()
    }

    // Completions are only ever produced by `perform` on this thread.
    fn set_waker(&mut self, _waker: LoopWaker) {}
}
