//! In-process CloudStack API stub for tests
//!
//! Answers each request with the JSON returned by a handler keyed on the
//! `command` parameter. Every response closes the connection.

use crate::client::CloudStackClient;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Commands received by the stub, in order
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Start a stub on a random local port and return a client pointed at it
pub async fn serve<F>(handler: F) -> (CloudStackClient, CallLog)
where
    F: Fn(&str) -> Value + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let log = calls.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = handler.clone();
            let log = log.clone();
            tokio::spawn(async move {
                respond(stream, &*handler, &log).await;
            });
        }
    });

    let client = CloudStackClient::builder(&format!("http://{}/client/api", addr), "key", "secret")
        .build()
        .unwrap();
    (client, calls)
}

async fn respond(mut stream: TcpStream, handler: &(dyn Fn(&str) -> Value + Send + Sync), log: &CallLog) {
    let request = read_request(&mut stream).await;
    let command = command_of(&request);
    log.lock().unwrap().push(command.clone());

    let body = handler(&command).to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Read the head and, when present, the body of one HTTP request
async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}

/// Pull the `command` parameter out of the request line or the form body
fn command_of(request: &str) -> String {
    request
        .split(|c| c == '?' || c == '&' || c == '\n' || c == ' ')
        .find_map(|part| part.trim().strip_prefix("command="))
        .unwrap_or_default()
        .to_string()
}

/// Body of a successful async job poll
pub fn job_done(command: &str) -> Option<Value> {
    (command == "queryAsyncJobResult").then(|| {
        serde_json::json!({
            "queryasyncjobresultresponse": {"jobstatus": 1, "jobresult": {"success": true}}
        })
    })
}

/// Body of an API error for `command`
pub fn api_failure(command: &str, text: &str) -> Value {
    serde_json::json!({
        (format!("{}response", command.to_lowercase())): {"errorcode": 530, "errortext": text}
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_of() {
        assert_eq!(
            command_of("GET /client/api?apikey=key&command=listZones&response=json HTTP/1.1\r\n"),
            "listZones"
        );
        assert_eq!(
            command_of("POST /client/api HTTP/1.1\r\nContent-Length: 30\r\n\r\napikey=key&command=createNetwork&name=web"),
            "createNetwork"
        );
    }
}
