use std::sync::Arc;

use anyhow::{Context, Result, bail};
use headless_chrome::Tab;
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{Action, ActionResult};

/// JavaScript installed into the page to run the action batch. It is
/// self-contained: it receives the serialized action list and the pacing
/// delay, resolves targets, simulates input events, and accumulates one
/// result per action. The orchestrator only pumps `step()` and reads
/// `results()` back: a command batch in, a result batch out.
///
/// Target resolution is two-stage with fixed precedence: direct
/// `querySelector` lookup first; if that throws or matches nothing, a linear
/// scan for an element whose trimmed text content equals the raw target
/// string. Best-effort, not a guarantee.
const RUNNER_JS: &str = r#"
(() => {
  const actions = __ACTIONS_JSON__;
  const paceMs = __PACE_MS__;
  const OUTLINE = { click: '#3b82f6', input: '#22c55e', select: '#f59e0b' };
  const sleep = (ms) => new Promise((resolve) => setTimeout(resolve, ms));

  function resolveTarget(target) {
    try {
      const el = document.querySelector(target);
      if (el) return el;
    } catch (e) { /* malformed selector, fall back to the text scan */ }
    const needle = target.trim();
    for (const el of document.querySelectorAll('*')) {
      if (el.textContent && el.textContent.trim() === needle) return el;
    }
    return null;
  }

  function highlight(el, kind) {
    el.scrollIntoView({ behavior: 'smooth', block: 'center' });
    const previous = el.style.outline;
    el.style.outline = '3px solid ' + (OUTLINE[kind] || '#ef4444');
    setTimeout(() => { el.style.outline = previous; }, 800);
  }

  function simulateInput(el, text) {
    el.focus();
    el.value = '';
    for (const ch of text) {
      el.dispatchEvent(new KeyboardEvent('keydown', { key: ch, bubbles: true }));
      el.value += ch;
      el.dispatchEvent(new KeyboardEvent('keypress', { key: ch, bubbles: true }));
      el.dispatchEvent(new Event('input', { bubbles: true }));
      el.dispatchEvent(new KeyboardEvent('keyup', { key: ch, bubbles: true }));
    }
    el.dispatchEvent(new Event('change', { bubbles: true }));
  }

  async function perform(action) {
    await sleep(paceMs);
    if ((action.kind === 'input' || action.kind === 'select') && typeof action.value !== 'string') {
      return { status: 'error', errorDetail: 'MissingValue: ' + action.kind + ' requires a value' };
    }
    const el = resolveTarget(action.target);
    if (!el) {
      return { status: 'error', errorDetail: 'ElementNotFound: ' + action.target };
    }
    highlight(el, action.kind);
    switch (action.kind) {
      case 'click':
        el.click();
        break;
      case 'input':
        simulateInput(el, action.value);
        break;
      case 'select':
        el.value = action.value;
        el.dispatchEvent(new Event('change', { bubbles: true }));
        break;
      default:
        return { status: 'error', errorDetail: 'UnknownActionType: ' + action.kind };
    }
    return { status: 'success' };
  }

  let cursor = 0;
  const results = [];
  window.__replayRunner = {
    async step() {
      if (cursor >= actions.length) return null;
      const action = actions[cursor++];
      let outcome;
      try {
        outcome = await perform(action);
      } catch (err) {
        outcome = { status: 'error', errorDetail: String(err) };
      }
      const result = Object.assign({ action: action }, outcome);
      results.push(result);
      return JSON.stringify(result);
    },
    results() {
      return JSON.stringify(results);
    },
  };
  return actions.length;
})()
"#;

const STEP_CALL: &str = "window.__replayRunner.step()";
const RESULTS_CALL: &str = "window.__replayRunner.results()";
const CLEANUP_CALL: &str = "delete window.__replayRunner";

/// Per-action delay: reference interval divided by the pacing multiplier,
/// so larger speeds shorten the pause before each action.
pub fn pace_ms(interval_ms: u64, speed: f64) -> u64 {
    (interval_ms as f64 / speed).round() as u64
}

/// Replays the batch inside the page. `on_step` fires after every action so
/// the caller can capture evidence and publish progress while the run is
/// still going. A failed action is recorded and the batch continues; only a
/// broken page channel aborts.
pub fn execute(
    tab: &Arc<Tab>,
    actions: &[Action],
    interval_ms: u64,
    speed: f64,
    mut on_step: impl FnMut(&ActionResult),
) -> Result<Vec<ActionResult>> {
    if actions.is_empty() {
        return Ok(Vec::new());
    }

    install(tab, actions, pace_ms(interval_ms, speed))?;

    loop {
        let value = tab
            .evaluate(STEP_CALL, true)
            .context("stepping the in-page runner")?
            .value;
        match parse_step(value)? {
            Some(result) => {
                debug!(
                    "action {} {} -> {:?}",
                    result.action.kind, result.action.target, result.status
                );
                on_step(&result);
            }
            None => break,
        }
    }

    let results = collect_results(tab)?;
    if let Err(e) = tab.evaluate(CLEANUP_CALL, false) {
        warn!("could not remove in-page runner: {e:#}");
    }
    if results.len() != actions.len() {
        warn!(
            "runner returned {} results for {} actions",
            results.len(),
            actions.len()
        );
    }
    Ok(results)
}

fn install(tab: &Arc<Tab>, actions: &[Action], pace_ms: u64) -> Result<()> {
    let script = build_runner_script(actions, pace_ms)?;
    let installed = tab
        .evaluate(&script, false)
        .context("installing the in-page runner")?;
    let count = installed.value.as_ref().and_then(Value::as_u64);
    if count != Some(actions.len() as u64) {
        bail!("runner installation returned {count:?} for {} actions", actions.len());
    }
    Ok(())
}

fn build_runner_script(actions: &[Action], pace_ms: u64) -> Result<String> {
    // pace first: the serialized actions are user data and may contain the
    // other placeholder as a literal
    Ok(RUNNER_JS
        .replace("__PACE_MS__", &pace_ms.to_string())
        .replace("__ACTIONS_JSON__", &serde_json::to_string(actions)?))
}

/// `step()` resolves to a JSON-encoded ActionResult, or null when the batch
/// is exhausted.
fn parse_step(value: Option<Value>) -> Result<Option<ActionResult>> {
    match value {
        Some(Value::String(payload)) => {
            let result = serde_json::from_str(&payload)
                .with_context(|| format!("malformed step payload: {payload}"))?;
            Ok(Some(result))
        }
        Some(Value::Null) | None => Ok(None),
        Some(other) => bail!("unexpected step payload: {other}"),
    }
}

fn collect_results(tab: &Arc<Tab>) -> Result<Vec<ActionResult>> {
    let value = tab
        .evaluate(RESULTS_CALL, false)
        .context("collecting runner results")?
        .value;
    match value {
        Some(Value::String(payload)) => {
            serde_json::from_str(&payload).context("malformed results payload")
        }
        other => bail!("unexpected results payload: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionStatus;

    fn click(target: &str) -> Action {
        Action {
            kind: "click".into(),
            target: target.into(),
            value: None,
        }
    }

    #[test]
    fn pace_shortens_with_speed() {
        assert_eq!(pace_ms(1000, 1.0), 1000);
        assert_eq!(pace_ms(1000, 2.0), 500);
        assert_eq!(pace_ms(1000, 0.5), 2000);
    }

    #[test]
    fn runner_script_embeds_batch_and_pace() {
        let actions = vec![click("#submit")];
        let script = build_runner_script(&actions, 250).unwrap();
        assert!(script.contains(r##"[{"kind":"click","target":"#submit","value":null}]"##));
        assert!(script.contains("const paceMs = 250;"));
        assert!(!script.contains("__ACTIONS_JSON__"));
        assert!(!script.contains("__PACE_MS__"));
    }

    #[test]
    fn placeholder_text_in_user_data_survives_templating() {
        let actions = vec![Action {
            kind: "input".into(),
            target: "#q".into(),
            value: Some("__PACE_MS__".into()),
        }];
        let script = build_runner_script(&actions, 100).unwrap();
        assert!(script.contains(r#""value":"__PACE_MS__""#));
    }

    #[test]
    fn step_payload_parses_success_and_error() {
        let ok = parse_step(Some(Value::String(
            r##"{"action":{"kind":"click","target":"#go"},"status":"success"}"##.into(),
        )))
        .unwrap()
        .unwrap();
        assert_eq!(ok.status, ActionStatus::Success);
        assert_eq!(ok.error_detail, None);

        let err = parse_step(Some(Value::String(
            r##"{"action":{"kind":"click","target":"#submit"},"status":"error","errorDetail":"ElementNotFound: #submit"}"##
                .into(),
        )))
        .unwrap()
        .unwrap();
        assert_eq!(err.status, ActionStatus::Error);
        assert_eq!(err.error_detail.as_deref(), Some("ElementNotFound: #submit"));
    }

    #[test]
    fn null_step_payload_ends_the_batch() {
        assert!(parse_step(Some(Value::Null)).unwrap().is_none());
        assert!(parse_step(None).unwrap().is_none());
    }

    #[test]
    fn result_batch_preserves_submission_order() {
        let payload = r##"[
            {"action":{"kind":"click","target":"#a"},"status":"success"},
            {"action":{"kind":"input","target":"#b","value":"x"},"status":"error","errorDetail":"ElementNotFound: #b"},
            {"action":{"kind":"select","target":"#c","value":"y"},"status":"success"}
        ]"##;
        let results: Vec<ActionResult> = serde_json::from_str(payload).unwrap();
        assert_eq!(results.len(), 3);
        let targets: Vec<&str> = results.iter().map(|r| r.action.target.as_str()).collect();
        assert_eq!(targets, ["#a", "#b", "#c"]);
        assert_eq!(results[1].status, ActionStatus::Error);
        assert_eq!(results[2].status, ActionStatus::Success);
    }
}
