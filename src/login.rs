use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use headless_chrome::Tab;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::cookies::{self, CookieStore};
use crate::error::AutomationError;
use crate::navigate::{Navigator, TabDriver};
use crate::types::FormDescriptor;

/// Scans the current page for credential inputs and a submit control and
/// reports their descriptors as JSON.
const DISCOVER_FORM_JS: &str = r#"
(() => {
  const describe = (el, label) => ({
    tag: el.tagName.toLowerCase(),
    type: el.type || null,
    name: el.name || null,
    id: el.id || null,
    placeholder: el.placeholder || null,
    label: label || null,
  });

  const inputs = [];
  for (const el of document.querySelectorAll('input, textarea')) {
    if (el.type === 'hidden') continue;
    const label = el.labels && el.labels[0] ? el.labels[0].textContent.trim() : null;
    inputs.push(describe(el, label));
  }

  const candidate =
    document.querySelector('button[type=submit], input[type=submit]') ||
    document.querySelector('form button') ||
    document.querySelector('button');
  const submit = candidate
    ? describe(candidate, (candidate.textContent || candidate.value || '').trim())
    : null;

  return JSON.stringify({ inputs, submit });
})()
"#;

/// Fills inputs matched by name, fires the events form state tends to listen
/// for, and triggers the submit control.
const FILL_AND_SUBMIT_JS: &str = r#"
(() => {
  const credentials = __CREDENTIALS_JSON__;
  let filled = 0;
  for (const [name, value] of Object.entries(credentials)) {
    const el = document.querySelector('[name=' + JSON.stringify(name) + ']');
    if (!el) continue;
    el.focus();
    el.value = value;
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
    filled += 1;
  }

  const candidate =
    document.querySelector('button[type=submit], input[type=submit]') ||
    document.querySelector('form button') ||
    document.querySelector('button');
  if (candidate) candidate.click();

  return JSON.stringify({ filled, submitted: !!candidate });
})()
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    AwaitingFormDiscovery,
    AwaitingCredentials,
    Verifying,
    LoggedIn,
}

/// Outcome of one guided submission: either the session is logged in, or the
/// attempt failed and the re-discovered form goes back to the caller.
pub enum LoginAttempt {
    LoggedIn,
    Retry(FormDescriptor),
}

/// Login state machine. Guided form login drives headless deployments;
/// manual login holds a visible browser open for a human.
pub struct LoginFlow {
    pub state: LoginState,
}

impl LoginFlow {
    /// Guided flow entry: navigate to the target and report the discovered
    /// form, moving to AwaitingCredentials.
    pub fn begin(
        &mut self,
        tab: &Arc<Tab>,
        navigator: &Navigator,
        target: &str,
    ) -> Result<FormDescriptor, AutomationError> {
        self.state = LoginState::AwaitingFormDiscovery;
        navigator.navigate(&TabDriver::new(tab), target)?;
        let form = discover_form(tab)
            .map_err(AutomationError::SessionUnavailable)?;
        self.state = LoginState::AwaitingCredentials;
        Ok(form)
    }

    /// Guided flow submission: fill, submit, wait for quiescence, then verify
    /// by address. Landing anywhere other than the requested target is a
    /// failed attempt, not an error: the form is re-discovered and offered
    /// again.
    pub fn submit(
        &mut self,
        tab: &Arc<Tab>,
        store: &CookieStore,
        target: &str,
        credentials: &HashMap<String, String>,
    ) -> Result<LoginAttempt, AutomationError> {
        self.state = LoginState::Verifying;
        fill_and_submit(tab, credentials).map_err(AutomationError::SessionUnavailable)?;
        if let Err(e) = tab.wait_until_navigated() {
            // some pages submit without a full navigation; verification by
            // address below still decides the outcome
            warn!("no navigation observed after submit: {e:#}");
        }

        if address_matches(&tab.get_url(), target) {
            info!("login verified, persisting session cookies");
            persist_cookies(tab, store);
            self.state = LoginState::LoggedIn;
            return Ok(LoginAttempt::LoggedIn);
        }

        info!("login attempt did not reach {target}, re-discovering form");
        let form = discover_form(tab).map_err(AutomationError::SessionUnavailable)?;
        self.state = LoginState::AwaitingCredentials;
        Ok(LoginAttempt::Retry(form))
    }

    /// Manual flow: navigate, hold the visible browser open for the wait
    /// window, then persist whatever cookies the session now holds. There is
    /// no way to detect whether the human actually logged in, so success is
    /// assumed unconditionally.
    pub fn manual(
        &mut self,
        tab: &Arc<Tab>,
        navigator: &Navigator,
        store: &CookieStore,
        target: &str,
        wait: Duration,
    ) -> Result<(), AutomationError> {
        navigator.navigate(&TabDriver::new(tab), target)?;
        info!("holding session for manual login ({}s)", wait.as_secs());
        std::thread::sleep(wait);
        warn!("persisting cookies without verifying the manual login succeeded");
        persist_cookies(tab, store);
        self.state = LoginState::LoggedIn;
        Ok(())
    }
}

fn persist_cookies(tab: &Arc<Tab>, store: &CookieStore) {
    match cookies::collect_from_tab(tab) {
        Ok(records) => {
            if let Err(e) = store.save(&records) {
                warn!("{e}");
            }
        }
        Err(e) => warn!("could not read session cookies: {e:#}"),
    }
}

fn discover_form(tab: &Arc<Tab>) -> Result<FormDescriptor> {
    let value = tab
        .evaluate(DISCOVER_FORM_JS, false)
        .context("scanning page for form inputs")?
        .value;
    parse_form_payload(value)
}

fn fill_and_submit(tab: &Arc<Tab>, credentials: &HashMap<String, String>) -> Result<()> {
    let script = FILL_AND_SUBMIT_JS.replace(
        "__CREDENTIALS_JSON__",
        &serde_json::to_string(credentials)?,
    );
    let value = tab
        .evaluate(&script, false)
        .context("filling login form")?
        .value;
    if let Some(Value::String(payload)) = value {
        let outcome: Value = serde_json::from_str(&payload)?;
        info!(
            "login form: filled {} field(s), submit control {}",
            outcome["filled"],
            if outcome["submitted"].as_bool().unwrap_or(false) {
                "clicked"
            } else {
                "not found"
            }
        );
    }
    Ok(())
}

fn parse_form_payload(value: Option<Value>) -> Result<FormDescriptor> {
    match value {
        Some(Value::String(payload)) => {
            serde_json::from_str(&payload).context("malformed form descriptor")
        }
        other => bail!("unexpected form discovery payload: {other:?}"),
    }
}

/// Address equality for verification; a trailing slash difference is not a
/// different page.
fn address_matches(current: &str, target: &str) -> bool {
    current.trim_end_matches('/') == target.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_payload_parses_inputs_and_submit() {
        let payload = r#"{
            "inputs": [
                {"tag":"input","type":"text","name":"username","id":"user","placeholder":"Email","label":"Email"},
                {"tag":"input","type":"password","name":"password","id":null,"placeholder":null,"label":"Password"}
            ],
            "submit": {"tag":"button","type":"submit","name":null,"id":null,"placeholder":null,"label":"Sign in"}
        }"#;
        let form = parse_form_payload(Some(Value::String(payload.into()))).unwrap();
        assert_eq!(form.inputs.len(), 2);
        assert_eq!(form.inputs[0].name.as_deref(), Some("username"));
        assert_eq!(form.inputs[1].input_type.as_deref(), Some("password"));
        assert_eq!(form.submit.unwrap().label.as_deref(), Some("Sign in"));
    }

    #[test]
    fn form_payload_without_submit_control() {
        let payload = r#"{"inputs": [], "submit": null}"#;
        let form = parse_form_payload(Some(Value::String(payload.into()))).unwrap();
        assert!(form.inputs.is_empty());
        assert!(form.submit.is_none());
    }

    #[test]
    fn address_match_ignores_trailing_slash_only() {
        assert!(address_matches(
            "https://example.test/board/",
            "https://example.test/board"
        ));
        assert!(!address_matches(
            "https://example.test/login?next=board",
            "https://example.test/board"
        ));
    }

    #[test]
    fn credentials_are_embedded_as_json() {
        let mut creds = HashMap::new();
        creds.insert("username".to_string(), "ada".to_string());
        let script = FILL_AND_SUBMIT_JS.replace(
            "__CREDENTIALS_JSON__",
            &serde_json::to_string(&creds).unwrap(),
        );
        assert!(script.contains(r#"{"username":"ada"}"#));
    }
}
