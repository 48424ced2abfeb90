use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum StubBehavior {
    /// Answer heading and sample prompts with well-formed chapter arrays.
    Propose,
    /// Answer with text that is not a JSON array.
    Garbage,
    /// Fail every request with HTTP 500.
    ServerError,
}

pub struct OpenAiStub {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl OpenAiStub {
    pub fn spawn(behavior: StubBehavior) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start openai stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v1");

        let hits = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn({
            let hits = Arc::clone(&hits);
            move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }

                    let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                        Ok(Some(req)) => req,
                        Ok(None) => continue,
                        Err(_) => break,
                    };

                    let path = request.url().to_string();
                    if request.method() != &tiny_http::Method::Post || path != "/v1/responses" {
                        let _ = request.respond(
                            tiny_http::Response::from_string("not found").with_status_code(404),
                        );
                        continue;
                    }
                    hits.fetch_add(1, Ordering::SeqCst);

                    let mut body = String::new();
                    if request.as_reader().read_to_string(&mut body).is_err() {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid request body")
                                .with_status_code(400),
                        );
                        continue;
                    }
                    let parsed: Value = match serde_json::from_str(&body) {
                        Ok(value) => value,
                        Err(_) => {
                            let _ = request.respond(
                                tiny_http::Response::from_string("invalid json")
                                    .with_status_code(400),
                            );
                            continue;
                        }
                    };
                    let prompt = parsed
                        .get("input")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_owned();

                    let output_text = match behavior {
                        StubBehavior::ServerError => {
                            let error = serde_json::json!({
                                "error": { "message": "stub overloaded" }
                            });
                            let _ = request.respond(
                                tiny_http::Response::from_string(error.to_string())
                                    .with_status_code(500),
                            );
                            continue;
                        }
                        StubBehavior::Garbage => "I think there are a few chapters.".to_owned(),
                        StubBehavior::Propose => {
                            if prompt.contains("BEGIN_HEADINGS") {
                                headings_response(&prompt)
                            } else if prompt.contains("BEGIN_SAMPLES") {
                                samples_response(&prompt)
                            } else {
                                let _ = request.respond(
                                    tiny_http::Response::from_string("unknown prompt mode")
                                        .with_status_code(400),
                                );
                                continue;
                            }
                        }
                    };

                    let response_body = serde_json::json!({
                        "id": "resp_stub",
                        "object": "response",
                        "model": parsed.get("model").cloned().unwrap_or(Value::String("stub-model".to_owned())),
                        "output": [
                            {
                                "type": "message",
                                "role": "assistant",
                                "content": [
                                    { "type": "output_text", "text": output_text }
                                ]
                            }
                        ],
                        "output_text": output_text
                    });

                    let header = tiny_http::Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"application/json"[..],
                    )
                    .expect("build header");
                    let response = tiny_http::Response::from_string(response_body.to_string())
                        .with_status_code(200)
                        .with_header(header);
                    let _ = request.respond(response);
                }
            }
        });

        Self {
            base_url,
            hits,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Requests received on `/v1/responses`.
    #[allow(dead_code)]
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for OpenAiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn extract_between<'a>(text: &'a str, begin: &str, end: &str) -> Option<&'a str> {
    let start = text.find(begin)? + begin.len();
    let rest = &text[start..];
    let end_rel = rest.find(end)?;
    Some(&rest[..end_rel])
}

/// Every listed heading (`- Page N: Title`) is declared a chapter.
fn headings_response(prompt: &str) -> String {
    let listing = extract_between(prompt, "BEGIN_HEADINGS\n", "\nEND_HEADINGS").unwrap_or("");
    let chapters: Vec<Value> = listing
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("- Page ")?;
            let (page, title) = rest.split_once(": ")?;
            let page: u32 = page.trim().parse().ok()?;
            Some(serde_json::json!({ "title": title, "startPage": page }))
        })
        .collect();
    // fenced, as chat models often reply
    format!("```json\n{}\n```", Value::Array(chapters))
}

/// Every third sampled page (`--- Page N ---`) starts a chapter that runs to
/// the next one; the total comes from the prompt's first line.
fn samples_response(prompt: &str) -> String {
    let total: u32 = prompt
        .split_whitespace()
        .skip_while(|word| *word != "with")
        .nth(1)
        .and_then(|word| word.parse().ok())
        .unwrap_or(1);
    let samples = extract_between(prompt, "BEGIN_SAMPLES\n", "\nEND_SAMPLES").unwrap_or("");
    let starts: Vec<u32> = samples
        .lines()
        .filter_map(|line| {
            line.strip_prefix("--- Page ")?
                .strip_suffix(" ---")?
                .parse()
                .ok()
        })
        .step_by(3)
        .collect();

    let chapters: Vec<Value> = starts
        .iter()
        .enumerate()
        .map(|(i, start)| {
            let next = starts.get(i + 1).copied().unwrap_or(total + 1);
            serde_json::json!({
                "title": format!("Part {}", i + 1),
                "start_page": start,
                "estimated_pages": next - start,
            })
        })
        .collect();
    Value::Array(chapters).to_string()
}
