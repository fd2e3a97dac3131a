//! In-process HTTP stub for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use pinfetch::{FetchOptions, Fetcher, Pinfetch, RetryPolicy};

/// A canned response.
#[derive(Debug, Clone)]
pub struct StubResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl StubResponse {
    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Default)]
struct State {
    /// Responses per request target; the last one repeats.
    routes: HashMap<String, VecDeque<StubResponse>>,
    hits: HashMap<String, usize>,
    authorization: HashMap<String, Vec<Option<String>>>,
}

/// Serves scripted responses on `127.0.0.1` and records what it receives.
pub struct StubServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl StubServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
        let addr = listener.local_addr().expect("stub server address");
        let state = Arc::new(Mutex::new(State::default()));
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                handle(stream, &shared);
            }
        });
        Self { addr, state }
    }

    /// Script the responses for a request target such as `/a/b?x=1`.
    pub fn route(&self, target: &str, responses: impl IntoIterator<Item = StubResponse>) {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(target.to_string(), responses.into_iter().collect());
    }

    /// `127.0.0.1:<port>`, for custom-domain setups.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn url(&self, target: &str) -> String {
        format!("http://{}{}", self.addr, target)
    }

    pub fn hits(&self, target: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .hits
            .get(target)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.state.lock().unwrap().hits.values().sum()
    }

    /// `Authorization` headers received for `target`, in order.
    pub fn authorization(&self, target: &str) -> Vec<Option<String>> {
        self.state
            .lock()
            .unwrap()
            .authorization
            .get(target)
            .cloned()
            .unwrap_or_default()
    }
}

fn handle(stream: TcpStream, state: &Mutex<State>) {
    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let target = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    let mut authorization = None;
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) if line.trim().is_empty() => break,
            Ok(_) => {
                if let Some((name, value)) = line.split_once(':')
                    && name.eq_ignore_ascii_case("authorization")
                {
                    authorization = Some(value.trim().to_string());
                }
            }
        }
    }

    let response = {
        let mut state = state.lock().unwrap();
        *state.hits.entry(target.clone()).or_default() += 1;
        state
            .authorization
            .entry(target.clone())
            .or_default()
            .push(authorization);
        let scripted = match state.routes.get_mut(&target) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        scripted.unwrap_or_else(|| StubResponse::status(404, &format!("no route for {target}")))
    };

    let reason = match response.status {
        200 => "OK",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        _ => "Status",
    };
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        reason,
        response.body.len()
    );
    for (name, value) in &response.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    out.push_str(&response.body);
    let mut writer = &stream;
    let _ = writer.write_all(out.as_bytes());
    let _ = writer.flush();
}

/// Records requested backoff delays instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }

    pub fn fetcher(&self, retry: RetryPolicy) -> Fetcher {
        let slept = Arc::clone(&self.slept);
        let opts = FetchOptions {
            retry,
            no_proxy: true,
            ..FetchOptions::default()
        };
        Fetcher::new(&opts)
            .unwrap()
            .with_sleep(move |delay| slept.lock().unwrap().push(delay))
    }
}

/// A service with its cache in `cache_dir` and a non-sleeping fetcher.
pub fn service(cache_dir: &Path, sleeper: &RecordingSleeper) -> Pinfetch {
    let pinfetch = Pinfetch::with_fetcher(sleeper.fetcher(RetryPolicy::default()));
    pinfetch.init_cache_dir(cache_dir).unwrap();
    pinfetch
}
