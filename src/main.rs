mod db;
mod grading;
mod ipc;

use std::io::{self, BufRead, Write};

fn main() {
    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                // A line that fails the envelope may still be valid JSON
                // carrying an id worth echoing back.
                let id = serde_json::from_str::<serde_json::Value>(&line)
                    .ok()
                    .and_then(|v| v["id"].as_str().map(str::to_string))
                    .unwrap_or_default();
                serde_json::json!({
                    "id": id,
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                })
            }
        };

        let out = serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string());
        if writeln!(stdout, "{}", out).is_err() {
            break;
        }
        let _ = stdout.flush();
    }
}
