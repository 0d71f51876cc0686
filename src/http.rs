use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::Config;
use crate::error::AutomationError;
use crate::login::{LoginAttempt, LoginState};
use crate::orchestrator::Command;
use crate::progress::RunEvent;
use crate::types::{AutomationRequest, AutomationResponse, FormDescriptor};

#[derive(Clone)]
pub struct AppState {
    pub commands: mpsc::Sender<Command>,
    pub events: broadcast::Sender<RunEvent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginTargetPayload {
    #[serde(alias = "url")]
    target_address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginSubmitPayload {
    #[serde(alias = "url")]
    target_address: String,
    credentials: HashMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginFormResponse {
    state: LoginState,
    form: FormDescriptor,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginSubmitResponse {
    success: bool,
    state: LoginState,
    #[serde(skip_serializing_if = "Option::is_none")]
    form: Option<FormDescriptor>,
}

/// Binds the HTTP interface and serves it in the background. Tries a small
/// port range starting at the configured port so a stale process does not
/// block startup.
pub async fn start_server(
    config: &Config,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<RunEvent>,
) -> Result<()> {
    let state = Arc::new(AppState { commands, events });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/automate", post(automate_handler))
        .route("/login/form", post(login_form_handler))
        .route("/login/submit", post(login_submit_handler))
        .route("/login/manual", post(login_manual_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { StatusCode::NO_CONTENT }),
        )
        .nest_service("/screenshots", ServeDir::new(config.screenshot_dir.clone()))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let base = config.port();
    let mut bound = None;
    for port in base..base + 10 {
        match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                bound = Some((listener, port));
                break;
            }
            Err(_) => continue,
        }
    }
    let (listener, port) = bound
        .ok_or_else(|| anyhow::anyhow!("could not bind any port in {base}..{}", base + 10))?;

    info!("web UI running at http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("http server stopped: {e}");
        }
    });

    Ok(())
}

fn status_for(error: &AutomationError) -> StatusCode {
    match error {
        AutomationError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: AutomationError) -> Response {
    (
        status_for(&error),
        Json(serde_json::json!({
            "error": { "message": error.to_string(), "detail": error.detail() }
        })),
    )
        .into_response()
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({
            "error": { "message": "automation engine is shutting down" }
        })),
    )
        .into_response()
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn automate_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AutomationRequest>,
) -> Response {
    // malformed submissions never reach the browser
    if let Err(e) = request.validate() {
        let status = status_for(&e);
        return (status, Json(AutomationResponse::failure(&e, Vec::new()))).into_response();
    }

    let (respond, rx) = oneshot::channel();
    if state
        .commands
        .send(Command::Automate { request, respond })
        .await
        .is_err()
    {
        return unavailable();
    }

    match rx.await {
        Ok(response) => {
            let status = if response.success {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(response)).into_response()
        }
        Err(_) => unavailable(),
    }
}

async fn login_form_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginTargetPayload>,
) -> Response {
    let (respond, rx) = oneshot::channel();
    if state
        .commands
        .send(Command::DiscoverForm {
            target: payload.target_address,
            respond,
        })
        .await
        .is_err()
    {
        return unavailable();
    }

    match rx.await {
        Ok(Ok(form)) => Json(LoginFormResponse {
            state: LoginState::AwaitingCredentials,
            form,
        })
        .into_response(),
        Ok(Err(e)) => error_response(e),
        Err(_) => unavailable(),
    }
}

async fn login_submit_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginSubmitPayload>,
) -> Response {
    let (respond, rx) = oneshot::channel();
    if state
        .commands
        .send(Command::SubmitLogin {
            target: payload.target_address,
            credentials: payload.credentials,
            respond,
        })
        .await
        .is_err()
    {
        return unavailable();
    }

    match rx.await {
        Ok(Ok(LoginAttempt::LoggedIn)) => Json(LoginSubmitResponse {
            success: true,
            state: LoginState::LoggedIn,
            form: None,
        })
        .into_response(),
        Ok(Ok(LoginAttempt::Retry(form))) => Json(LoginSubmitResponse {
            success: false,
            state: LoginState::AwaitingCredentials,
            form: Some(form),
        })
        .into_response(),
        Ok(Err(e)) => error_response(e),
        Err(_) => unavailable(),
    }
}

async fn login_manual_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginTargetPayload>,
) -> Response {
    let (respond, rx) = oneshot::channel();
    if state
        .commands
        .send(Command::ManualLogin {
            target: payload.target_address,
            respond,
        })
        .await
        .is_err()
    {
        return unavailable();
    }

    match rx.await {
        Ok(Ok(())) => Json(serde_json::json!({ "success": true })).into_response(),
        Ok(Err(e)) => error_response(e),
        Err(_) => unavailable(),
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result: Result<RunEvent, _>| match result {
        Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
        Err(_) => None,
    });
    Sse::new(stream)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>uireplay</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    min-height: 100vh;
  }
  header {
    padding: 24px 32px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; }
  header .dot {
    width: 8px; height: 8px;
    border-radius: 50%;
    background: #22c55e;
  }
  .main {
    max-width: 800px;
    width: 100%;
    margin: 0 auto;
    padding: 24px 32px;
    display: flex;
    flex-direction: column;
    gap: 16px;
  }
  label { font-size: 13px; color: #888; display: block; margin-bottom: 4px; }
  input, textarea {
    width: 100%;
    background: #111118;
    border: 1px solid #222;
    border-radius: 8px;
    padding: 10px 14px;
    color: #fff;
    font-size: 14px;
    outline: none;
  }
  input:focus, textarea:focus { border-color: #6366f1; }
  textarea { font-family: 'Cascadia Code', 'Fira Code', monospace; min-height: 80px; }
  small { color: #555; }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 8px;
    padding: 12px 24px;
    font-size: 15px;
    font-weight: 600;
    cursor: pointer;
    align-self: flex-start;
  }
  button:hover { background: #4f46e5; }
  button:disabled { background: #333; cursor: not-allowed; }
  #log { display: flex; flex-direction: column; gap: 8px; }
  .entry {
    padding: 10px 14px;
    border-radius: 8px;
    font-size: 13px;
    font-family: 'Cascadia Code', 'Fira Code', monospace;
    background: #111118;
    border-left: 3px solid #3b82f6;
  }
  .entry.error { border-left-color: #ef4444; color: #fca5a5; }
  .entry.done { border-left-color: #22c55e; color: #86efac; }
  pre {
    background: #111118;
    border-radius: 8px;
    padding: 14px;
    font-size: 12px;
    overflow-x: auto;
    white-space: pre-wrap;
    word-break: break-all;
  }
  #shots img { max-width: 100%; border-radius: 8px; margin-top: 8px; border: 1px solid #222; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="status-dot"></div>
    <h1>uireplay</h1>
  </header>
  <div class="main">
    <div>
      <label for="url">URL</label>
      <input id="url" type="text" placeholder="https://example.test/board" />
    </div>
    <div>
      <label for="actions">Actions JSON</label>
      <textarea id="actions">[]</textarea>
      <small>e.g. [{"kind":"click","target":"#submit"}]</small>
    </div>
    <div>
      <label for="cookie">Authentication cookies</label>
      <textarea id="cookie" placeholder="name1=value1; name2=value2"></textarea>
      <small>Format: name1=value1; name2=value2</small>
    </div>
    <div>
      <label for="speed">Speed</label>
      <input id="speed" type="number" value="1" min="0.1" step="0.1" />
    </div>
    <button id="run" onclick="run()">Run Automation</button>
    <div id="log"></div>
    <div id="result"></div>
    <div id="shots"></div>
  </div>
<script>
  const log = document.getElementById('log');
  const runBtn = document.getElementById('run');

  function addEntry(cls, text) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.textContent = text;
    log.appendChild(div);
  }

  async function run() {
    log.innerHTML = '';
    document.getElementById('result').innerHTML = '';
    document.getElementById('shots').innerHTML = '';
    runBtn.disabled = true;
    try {
      const body = {
        targetAddress: document.getElementById('url').value,
        actions: JSON.parse(document.getElementById('actions').value || '[]'),
        cookieString: document.getElementById('cookie').value || null,
        speed: parseFloat(document.getElementById('speed').value) || 1,
      };
      const res = await fetch('/automate', {
        method: 'POST',
        headers: {'Content-Type': 'application/json'},
        body: JSON.stringify(body),
      });
      const data = await res.json();
      const pre = document.createElement('pre');
      pre.textContent = JSON.stringify({ ...data, evidence: (data.evidence || []).map(s => ({label: s.label, file: s.file})) }, null, 2);
      document.getElementById('result').appendChild(pre);
      for (const shot of data.evidence || []) {
        if (!shot.file) continue;
        const img = document.createElement('img');
        img.src = shot.file;
        img.title = shot.label;
        document.getElementById('shots').appendChild(img);
      }
    } catch (err) {
      addEntry('error', 'Error during automation: ' + err.message);
    } finally {
      runBtn.disabled = false;
    }
  }

  const es = new EventSource('/events');
  es.addEventListener('action_step_completed', e => {
    const d = JSON.parse(e.data);
    const r = d.result;
    const ok = r.status === 'success';
    addEntry(ok ? '' : 'error',
      r.action.kind + ' ' + r.action.target + (ok ? '' : ' :: ' + r.errorDetail));
  });
  es.addEventListener('run_completed', e => {
    const d = JSON.parse(e.data);
    addEntry('done', 'Run completed: ' + d.results.length + ' action(s), ' + d.evidence.length + ' screenshot(s)');
  });
</script>
</body>
</html>
"##;
