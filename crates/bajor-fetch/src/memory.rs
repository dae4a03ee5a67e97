//! In-memory [`HttpGet`] for dry runs and tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;

use crate::http::{HttpGet, HttpResponse, TransportError};

struct Route {
    status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
    /// Leading calls that fail with a connection error before the route answers.
    transient_failures: usize,
}

/// Serves canned responses keyed by exact URL and counts calls per URL.
#[derive(Default)]
pub struct MemoryTransport {
    routes: HashMap<String, Route>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `200 OK` and the given body.
    pub fn with_body(mut self, url: &str, content_type: &str, body: Vec<u8>) -> Self {
        self.routes.insert(
            url.to_string(),
            Route {
                status: 200,
                content_type: Some(content_type.to_string()),
                body,
                transient_failures: 0,
            },
        );
        self
    }

    /// Answer `url` with an empty body and the given status.
    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.routes.insert(
            url.to_string(),
            Route {
                status,
                content_type: None,
                body: Vec::new(),
                transient_failures: 0,
            },
        );
        self
    }

    /// Make the first `n` calls to an existing route fail to connect.
    pub fn with_transient_failures(mut self, url: &str, n: usize) -> Self {
        if let Some(route) = self.routes.get_mut(url) {
            route.transient_failures = n;
        }
        self
    }

    /// How many times `url` was requested.
    pub fn calls(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

impl HttpGet for MemoryTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let call = {
            let mut calls = self
                .calls
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let n = calls.entry(url.to_string()).or_insert(0);
            *n += 1;
            *n
        };

        let route = self
            .routes
            .get(url)
            .ok_or_else(|| TransportError::Other(format!("no route for {url}")))?;
        if call <= route.transient_failures {
            return Err(TransportError::Connect(format!(
                "simulated connection reset ({call}/{})",
                route.transient_failures
            )));
        }

        Ok(HttpResponse {
            status: route.status,
            content_type: route.content_type.clone(),
            body: Box::new(Cursor::new(route.body.clone())),
        })
    }
}
