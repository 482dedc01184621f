//! Command handles.
//!
//! Requests and sessions can be exposed under generated handle names and
//! driven with string commands, the way a scripting host would. Each handle
//! kind has a declarative command table; dispatch looks the command up,
//! checks its arity and calls the handler.

use std::collections::HashMap;
use std::fmt;

use crate::context::{Context, RequestId, SessionId};
use crate::error::{CommandError, RequestError};
use crate::headers::HeaderSet;
use crate::logging;
use crate::options::{Mode, RequestOptions};
use crate::request::{HeaderLookup, Method};

const REQUEST_PREFIX: &str = "courier::request::handle";
const SESSION_PREFIX: &str = "courier::session::handle";

/// What an exposed handle refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleTarget {
    Request(RequestId),
    Session(SessionId),
}

/// Handle names of one context.
#[derive(Debug, Default)]
pub(crate) struct HandleRegistry {
    next: u64,
    targets: HashMap<String, HandleTarget>,
}

impl HandleRegistry {
    fn register(&mut self, prefix: &str, target: HandleTarget) -> String {
        self.next += 1;
        let name = format!("{prefix}{}", self.next);
        self.targets.insert(name.clone(), target);
        name
    }

    fn resolve(&self, name: &str) -> Option<HandleTarget> {
        self.targets.get(name).copied()
    }

    pub(crate) fn retract(&mut self, name: &str) {
        if self.targets.remove(name).is_some() {
            tracing::trace!(target: logging::NET, handle = name, "handle retracted");
        }
    }
}

/// The result of a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// No value.
    Empty,
    /// Text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// An integer.
    Int(i64),
    /// Response headers.
    Headers(HeaderSet),
    /// The values of one header.
    Values(Vec<String>),
    /// The name of a newly exposed handle.
    Handle(String),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Text(text) | Self::Handle(text) => f.write_str(text),
            Self::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Self::Int(value) => write!(f, "{value}"),
            Self::Headers(headers) => {
                let words: Vec<String> = headers
                    .iter()
                    .flat_map(|(name, value)| [name, value])
                    .map(list_element)
                    .collect();
                f.write_str(&words.join(" "))
            }
            Self::Values(values) => {
                let words: Vec<String> = values.iter().map(|v| list_element(v)).collect();
                f.write_str(&words.join(" "))
            }
        }
    }
}

fn list_element(word: &str) -> String {
    if !word.is_empty() && !word.contains(|c: char| c.is_whitespace() || "{}\"\\".contains(c)) {
        word.to_string()
    } else {
        format!("{{{word}}}")
    }
}

type Handler<T> = fn(&Context, T, &[&str], RequestOptions) -> Result<Reply, CommandError>;

/// One command table entry.
struct Command<T> {
    name: &'static str,
    /// Argument count after the command name.
    min: usize,
    max: usize,
    /// Argument synopsis shown in arity errors.
    args: &'static str,
    handler: Handler<T>,
}

const REQUEST_COMMANDS: &[Command<RequestId>] = &[
    Command { name: "text", min: 0, max: 0, args: "", handler: request_text },
    Command { name: "content", min: 0, max: 0, args: "", handler: request_content },
    Command { name: "error", min: 0, max: 0, args: "", handler: request_error },
    Command { name: "headers", min: 0, max: 0, args: "", handler: request_headers },
    Command { name: "header", min: 1, max: 1, args: "name", handler: request_header },
    Command { name: "encoding", min: 0, max: 1, args: "?encoding?", handler: request_encoding },
    Command { name: "status_code", min: 0, max: 0, args: "", handler: request_status_code },
    Command { name: "state", min: 0, max: 0, args: "", handler: request_state },
    Command { name: "destroy", min: 0, max: 0, args: "", handler: request_destroy },
];

const SESSION_COMMANDS: &[Command<SessionId>] = &[
    Command { name: "head", min: 1, max: 1, args: "url", handler: session_head },
    Command { name: "get", min: 1, max: 1, args: "url", handler: session_get },
    Command { name: "post", min: 1, max: 1, args: "url", handler: session_post },
    Command { name: "put", min: 1, max: 1, args: "url", handler: session_put },
    Command { name: "patch", min: 1, max: 1, args: "url", handler: session_patch },
    Command { name: "delete", min: 1, max: 1, args: "url", handler: session_delete },
    Command { name: "request", min: 2, max: 2, args: "method url", handler: session_custom },
    Command { name: "destroy", min: 0, max: 0, args: "", handler: session_destroy },
];

fn dispatch<T: Copy>(
    table: &[Command<T>],
    context: &Context,
    handle: &str,
    target: T,
    args: &[&str],
    options: RequestOptions,
    no_command_usage: &str,
) -> Result<Reply, CommandError> {
    let Some((name, rest)) = args.split_first() else {
        return Err(CommandError::WrongArgs {
            usage: format!("{handle} {no_command_usage}"),
        });
    };
    let command = table
        .iter()
        .find(|command| command.name == *name)
        .ok_or_else(|| CommandError::UnknownCommand {
            name: (*name).to_string(),
            expected: expected_names(table.iter().map(|command| command.name)),
        })?;
    if rest.len() < command.min || rest.len() > command.max {
        let usage = if command.args.is_empty() {
            format!("{handle} {}", command.name)
        } else {
            format!("{handle} {} {}", command.name, command.args)
        };
        return Err(CommandError::WrongArgs { usage });
    }
    (command.handler)(context, target, rest, options)
}

fn expected_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let names: Vec<&str> = names.collect();
    match names.split_last() {
        None => String::new(),
        Some((last, [])) => (*last).to_string(),
        Some((last, rest)) => format!("{}, or {last}", rest.join(", ")),
    }
}

impl Context {
    /// Expose a request under a generated handle name.
    ///
    /// Exposing an already exposed request returns its existing name. The
    /// handle is retracted when the request is freed.
    pub fn expose_request(&self, id: RequestId) -> Result<String, RequestError> {
        let cell = self
            .inner()
            .request_cell(id)
            .ok_or(RequestError::UnknownRequest)?;
        let mut request = cell.borrow_mut();
        if let Some(name) = &request.handle {
            return Ok(name.clone());
        }
        let name = self
            .inner()
            .handles
            .borrow_mut()
            .register(REQUEST_PREFIX, HandleTarget::Request(id));
        request.handle = Some(name.clone());
        Ok(name)
    }

    /// Expose a session under a generated handle name.
    pub fn expose_session(&self, id: SessionId) -> Result<String, RequestError> {
        let cell = self
            .inner()
            .session_cell(id)
            .ok_or(RequestError::UnknownSession)?;
        let mut session = cell.borrow_mut();
        if let Some(name) = &session.handle {
            return Ok(name.clone());
        }
        let name = self
            .inner()
            .handles
            .borrow_mut()
            .register(SESSION_PREFIX, HandleTarget::Session(id));
        session.handle = Some(name.clone());
        Ok(name)
    }

    /// What a handle name refers to.
    pub fn resolve_handle(&self, name: &str) -> Option<HandleTarget> {
        self.inner().handles.borrow().resolve(name)
    }

    /// Run a command on an exposed handle.
    ///
    /// `args` starts with the command name. Requests created by session
    /// commands use default options.
    pub fn invoke(&self, handle: &str, args: &[&str]) -> Result<Reply, CommandError> {
        self.invoke_with(handle, args, RequestOptions::new())
    }

    /// Run a command, passing `options` to request-creating commands.
    pub fn invoke_with(
        &self,
        handle: &str,
        args: &[&str],
        options: RequestOptions,
    ) -> Result<Reply, CommandError> {
        let target = self
            .resolve_handle(handle)
            .ok_or_else(|| CommandError::UnknownHandle(handle.to_string()))?;
        tracing::trace!(target: logging::NET, handle, ?args, "invoking command");
        match target {
            HandleTarget::Request(id) => {
                dispatch(REQUEST_COMMANDS, self, handle, id, args, options, "option ?arg ...?")
            }
            HandleTarget::Session(id) => dispatch(
                SESSION_COMMANDS,
                self,
                handle,
                id,
                args,
                options,
                "method url",
            ),
        }
    }
}

fn request_text(
    context: &Context,
    id: RequestId,
    _: &[&str],
    _: RequestOptions,
) -> Result<Reply, CommandError> {
    Ok(Reply::Text(context.text(id)?))
}

fn request_content(
    context: &Context,
    id: RequestId,
    _: &[&str],
    _: RequestOptions,
) -> Result<Reply, CommandError> {
    Ok(Reply::Bytes(context.content(id)?))
}

fn request_error(
    context: &Context,
    id: RequestId,
    _: &[&str],
    _: RequestOptions,
) -> Result<Reply, CommandError> {
    Ok(Reply::Text(context.error(id)?))
}

fn request_headers(
    context: &Context,
    id: RequestId,
    _: &[&str],
    _: RequestOptions,
) -> Result<Reply, CommandError> {
    Ok(Reply::Headers(context.headers(id)?))
}

fn request_header(
    context: &Context,
    id: RequestId,
    args: &[&str],
    _: RequestOptions,
) -> Result<Reply, CommandError> {
    let name = args[0];
    match context.header(id, name)? {
        Some(HeaderLookup::Single(value)) => Ok(Reply::Text(value)),
        Some(HeaderLookup::Multiple(values)) => Ok(Reply::Values(values)),
        None => Err(CommandError::HeaderNotFound(name.to_string())),
    }
}

fn request_encoding(
    context: &Context,
    id: RequestId,
    args: &[&str],
    _: RequestOptions,
) -> Result<Reply, CommandError> {
    if let Some(name) = args.first() {
        context.set_encoding(id, name)?;
    }
    Ok(Reply::Text(context.encoding(id)?))
}

fn request_status_code(
    context: &Context,
    id: RequestId,
    _: &[&str],
    _: RequestOptions,
) -> Result<Reply, CommandError> {
    Ok(Reply::Int(i64::from(context.status_code(id)?)))
}

fn request_state(
    context: &Context,
    id: RequestId,
    _: &[&str],
    _: RequestOptions,
) -> Result<Reply, CommandError> {
    Ok(Reply::Text(context.state(id)?.to_string()))
}

fn request_destroy(
    context: &Context,
    id: RequestId,
    _: &[&str],
    _: RequestOptions,
) -> Result<Reply, CommandError> {
    context.free_request(id);
    Ok(Reply::Empty)
}

fn session_issue(
    context: &Context,
    id: SessionId,
    method: Method,
    url: &str,
    options: RequestOptions,
) -> Result<Reply, CommandError> {
    if options.mode == Mode::Simple {
        let text = context.simple_in(Some(id), method, url, options)?;
        return Ok(Reply::Text(text));
    }
    let request = context.session_request(id, method, url, options)?;
    Ok(Reply::Handle(context.expose_request(request)?))
}

macro_rules! session_method {
    ($name:ident, $method:expr) => {
        fn $name(
            context: &Context,
            id: SessionId,
            args: &[&str],
            options: RequestOptions,
        ) -> Result<Reply, CommandError> {
            session_issue(context, id, $method, args[0], options)
        }
    };
}

session_method!(session_head, Method::Head);
session_method!(session_get, Method::Get);
session_method!(session_post, Method::Post);
session_method!(session_put, Method::Put);
session_method!(session_patch, Method::Patch);
session_method!(session_delete, Method::Delete);

fn session_custom(
    context: &Context,
    id: SessionId,
    args: &[&str],
    options: RequestOptions,
) -> Result<Reply, CommandError> {
    session_issue(context, id, Method::Custom(args[0].to_string()), args[1], options)
}

fn session_destroy(
    context: &Context,
    id: SessionId,
    _: &[&str],
    _: RequestOptions,
) -> Result<Reply, CommandError> {
    context.free_session(id);
    Ok(Reply::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_names() {
        assert_eq!(expected_names(["a"].into_iter()), "a");
        assert_eq!(expected_names(["a", "b", "c"].into_iter()), "a, b, or c");
    }

    #[test]
    fn test_registry_names_are_unique() {
        let mut registry = HandleRegistry::default();
        let id = RequestId::default();
        let first = registry.register(REQUEST_PREFIX, HandleTarget::Request(id));
        let second = registry.register(REQUEST_PREFIX, HandleTarget::Request(id));
        assert_ne!(first, second);
        assert_eq!(registry.resolve(&first), Some(HandleTarget::Request(id)));

        registry.retract(&first);
        assert_eq!(registry.resolve(&first), None);
        assert!(registry.resolve(&second).is_some());
    }

    #[test]
    fn test_reply_display() {
        let headers: HeaderSet = [("content-type", "text/plain; charset=utf-8"), ("x-a", "1")]
            .into_iter()
            .collect();
        assert_eq!(
            Reply::Headers(headers).to_string(),
            "content-type {text/plain; charset=utf-8} x-a 1"
        );
        assert_eq!(Reply::Int(404).to_string(), "404");
        assert_eq!(Reply::Empty.to_string(), "");
        assert_eq!(
            Reply::Values(vec!["a=1".into(), String::new()]).to_string(),
            "a=1 {}"
        );
    }

    #[test]
    fn test_table_arity_is_consistent() {
        for command in REQUEST_COMMANDS {
            assert!(command.min <= command.max, "{}", command.name);
        }
        for command in SESSION_COMMANDS {
            assert!(command.min <= command.max, "{}", command.name);
        }
    }
}
