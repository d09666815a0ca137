//! In-process stub of the remote assistants service, for exercising the run
//! controller and conversation manager against scripted responses.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;

/// Maps (method, path, per-route sequence number) to (status, json body).
pub(crate) type Responder = Box<dyn Fn(&str, &str, usize) -> (u16, String) + Send + Sync>;

pub(crate) struct StubService {
    pub(crate) base_url: String,
    hits: Arc<Mutex<Vec<String>>>,
}

/// Start a stub service on an ephemeral port. The serving thread runs until
/// the test process exits.
pub(crate) fn start(respond: Responder) -> StubService {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    let hits = Arc::new(Mutex::new(Vec::new()));
    let hits_log = Arc::clone(&hits);

    thread::spawn(move || {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for mut rq in server.incoming_requests() {
            let method = rq.method().to_string().to_uppercase();
            let path = rq.url().to_string();
            let key = format!("{method} {path}");
            let seq = {
                let n = counts.entry(key.clone()).or_insert(0);
                let seq = *n;
                *n += 1;
                seq
            };
            hits_log.lock().unwrap().push(key);

            let mut body = String::new();
            let _ = rq.as_reader().read_to_string(&mut body);

            let (status, reply) = respond(&method, &path, seq);
            let response = tiny_http::Response::from_string(reply)
                .with_status_code(status)
                .with_header(
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .unwrap(),
                );
            let _ = rq.respond(response);
        }
    });

    StubService {
        base_url: format!("http://127.0.0.1:{port}"),
        hits,
    }
}

impl StubService {
    /// Every request seen so far, as "METHOD /path" lines in arrival order.
    pub(crate) fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, line: &str) -> usize {
        self.hits().iter().filter(|h| h.as_str() == line).count()
    }
}
