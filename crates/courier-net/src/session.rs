//! The session entity.
//!
//! A session carries defaults inherited by the requests created through it
//! and a shared cache attached to each of them. It tracks those requests by
//! identifier only; each request points back at the session the same way.

use std::collections::HashSet;
use std::rc::Rc;

use crate::context::RequestId;
use crate::engine::{Engine, ShareHandle};
use crate::error::{RequestError, Result};
use crate::headers::HeaderSet;
use crate::options::SessionOptions;

/// Defaults and shared cache for a family of requests.
#[derive(Debug)]
pub struct Session {
    options: SessionOptions,
    headers: Option<Rc<HeaderSet>>,
    share: ShareHandle,
    requests: HashSet<RequestId>,
    pub(crate) handle: Option<String>,
}

impl Session {
    pub(crate) fn init(engine: &dyn Engine, mut options: SessionOptions) -> Result<Self> {
        let share = engine
            .create_share()
            .map_err(|e| RequestError::resource(format!("failed to allocate shared cache: {e}")))?;
        let headers = options.common.headers.take().map(Rc::new);
        Ok(Self {
            options,
            headers,
            share,
            requests: HashSet::new(),
            handle: None,
        })
    }

    /// Defaults other than headers.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Default headers, shared with requests that add none of their own.
    pub fn headers(&self) -> Option<Rc<HeaderSet>> {
        self.headers.clone()
    }

    /// The cache shared by the session's requests.
    pub fn share(&self) -> &ShareHandle {
        &self.share
    }

    /// Live requests created through this session.
    pub fn requests(&self) -> impl Iterator<Item = RequestId> + '_ {
        self.requests.iter().copied()
    }

    /// Number of live requests.
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Name of the exposed command handle, if any.
    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    pub(crate) fn attach(&mut self, id: RequestId) {
        self.requests.insert(id);
    }

    pub(crate) fn detach(&mut self, id: RequestId) {
        self.requests.remove(&id);
    }

    pub(crate) fn take_requests(&mut self) -> Vec<RequestId> {
        self.requests.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedEngine;
    use slotmap::KeyData;

    #[test]
    fn test_init_creates_share_and_keeps_headers() {
        let engine = ScriptedEngine::new();
        let session = Session::init(
            &engine,
            SessionOptions::new().header("Authorization", "Basic xxx"),
        )
        .unwrap();

        assert_eq!(engine.share_count(), 1);
        assert!(session.options().common.headers.is_none());
        assert_eq!(
            session.headers().unwrap().get("authorization"),
            Some("Basic xxx")
        );
    }

    #[test]
    fn test_membership() {
        let engine = ScriptedEngine::new();
        let mut session = Session::init(&engine, SessionOptions::new()).unwrap();
        let a = RequestId::from(KeyData::from_ffi(1));
        let b = RequestId::from(KeyData::from_ffi(2));

        session.attach(a);
        session.attach(b);
        session.attach(a);
        assert_eq!(session.request_count(), 2);

        session.detach(a);
        assert_eq!(session.requests().collect::<Vec<_>>(), vec![b]);
        assert_eq!(session.take_requests(), vec![b]);
        assert_eq!(session.request_count(), 0);
    }
}
