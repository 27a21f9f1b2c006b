#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Cursor, Read};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use datacollective::api::{Body, HttpRequest, HttpResponse, Method, Transport};
use datacollective::{ApiClient, ClientConfig, DataCollectiveError};
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub const API_URL: &str = "https://api.test";

/// What the fake server answers to one request.
#[derive(Clone, Debug)]
pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    cut_after: Option<usize>,
    raise_after: Option<(usize, Arc<AtomicBool>)>,
    transport_error: Option<String>,
}

impl Reply {
    pub fn bytes(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            cut_after: None,
            raise_after: None,
            transport_error: None,
        }
    }

    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self::bytes(status, value.to_string()).header("Content-Type", "application/json")
    }

    pub fn status(status: u16) -> Self {
        Self::bytes(status, Vec::new())
    }

    /// The connection never produces a response.
    pub fn unreachable(message: &str) -> Self {
        Self {
            transport_error: Some(message.to_string()),
            ..Self::status(0)
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Deliver only the first `len` body bytes, then fail the read.
    pub fn cut_after(mut self, len: usize) -> Self {
        self.cut_after = Some(len);
        self
    }

    /// Set `flag` as soon as the client has read `len` body bytes.
    pub fn raise_after(mut self, len: usize, flag: Arc<AtomicBool>) -> Self {
        self.raise_after = Some((len, flag));
        self
    }
}

/// Body that raises a flag once a given number of bytes has been read,
/// never handing out more than that in the read that crosses it.
struct RaisingBody {
    data: Cursor<Vec<u8>>,
    remaining: usize,
    flag: Arc<AtomicBool>,
}

impl Read for RaisingBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return self.data.read(buf);
        }
        let limit = buf.len().min(self.remaining);
        let read = self.data.read(&mut buf[..limit])?;
        self.remaining -= read;
        if self.remaining == 0 {
            self.flag.store(true, Ordering::SeqCst);
        }
        Ok(read)
    }
}

/// Body that breaks off with a connection reset.
struct BrokenBody {
    data: Cursor<Vec<u8>>,
}

impl Read for BrokenBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.data.read(buf)? {
            0 => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
            read => Ok(read),
        }
    }
}

type Handler = Box<dyn FnMut(&HttpRequest) -> Reply>;

struct MockState {
    handler: Handler,
    requests: Vec<HttpRequest>,
}

struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

impl Transport for MockTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, DataCollectiveError> {
        let reply = {
            let mut state = self.state.borrow_mut();
            let reply = (state.handler)(&request);
            state.requests.push(request.clone());
            reply
        };

        if let Some(message) = reply.transport_error {
            return Err(DataCollectiveError::Transport {
                url: request.url,
                message,
            });
        }

        let body: Box<dyn Read> = match (reply.cut_after, reply.raise_after) {
            (Some(len), _) => {
                let mut data = reply.body;
                data.truncate(len);
                Box::new(BrokenBody {
                    data: Cursor::new(data),
                })
            }
            (None, Some((len, flag))) => Box::new(RaisingBody {
                data: Cursor::new(reply.body),
                remaining: len,
                flag,
            }),
            (None, None) => Box::new(Cursor::new(reply.body)),
        };
        Ok(HttpResponse::new(reply.status, reply.headers, body))
    }
}

/// Read-only view of what the client sent.
#[derive(Clone)]
pub struct Recorder {
    state: Rc<RefCell<MockState>>,
}

impl Recorder {
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.borrow().requests.clone()
    }

    pub fn count(&self, method: Method, url_part: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.method == method && request.url.contains(url_part))
            .count()
    }

    pub fn puts(&self) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == Method::Put)
            .collect()
    }

    pub fn clear(&self) {
        self.state.borrow_mut().requests.clear();
    }
}

pub fn config() -> ClientConfig {
    ClientConfig::new("test-key")
        .with_api_url(API_URL)
        .expect("valid api url")
}

/// Client whose transport answers every request through `handler`.
pub fn mock_client(handler: impl FnMut(&HttpRequest) -> Reply + 'static) -> (ApiClient, Recorder) {
    let state = Rc::new(RefCell::new(MockState {
        handler: Box::new(handler),
        requests: Vec::new(),
    }));
    let client = ApiClient::with_transport(
        config(),
        MockTransport {
            state: Rc::clone(&state),
        },
    );
    (client, Recorder { state })
}

/// Client that answers requests with `replies` in order.
pub fn queued_client(replies: Vec<Reply>) -> (ApiClient, Recorder) {
    let mut queue: VecDeque<Reply> = replies.into();
    mock_client(move |request| {
        queue
            .pop_front()
            .unwrap_or_else(|| Reply::unreachable(&format!("unexpected request to {}", request.url)))
    })
}

pub fn json_body(request: &HttpRequest) -> serde_json::Value {
    match &request.body {
        Body::Json(value) => value.clone(),
        other => panic!("expected a JSON body, got {other:?}"),
    }
}

pub fn byte_body(request: &HttpRequest) -> Vec<u8> {
    match &request.body {
        Body::Bytes(bytes) => bytes.clone(),
        other => panic!("expected a byte body, got {other:?}"),
    }
}

pub fn query_value<'a>(request: &'a HttpRequest, name: &str) -> Option<&'a str> {
    request
        .query
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Deterministic, non-repeating-looking test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(32);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 256;
    config
}
