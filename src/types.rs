use serde::{Deserialize, Serialize};

use crate::cookies::CookieRecord;
use crate::error::AutomationError;

/// One automation submission: where to go and what to replay there.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRequest {
    #[serde(alias = "url")]
    pub target_address: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub cookies: Option<Vec<CookieRecord>>,
    /// Raw `name1=v1; name2=v2` form; expanded against the target host.
    #[serde(default, alias = "cookie")]
    pub cookie_string: Option<String>,
    #[serde(default = "default_speed")]
    pub speed: f64,
}

fn default_speed() -> f64 {
    1.0
}

/// A single UI step. `kind` stays a raw string so an unrecognized kind is a
/// per-action runtime error instead of a request-level parse failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    #[serde(alias = "type")]
    pub kind: String,
    pub target: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Error,
}

/// Outcome of one action, produced in submission order, one per action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub action: Action,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

/// A captured checkpoint image: written to the screenshot directory when
/// possible, always carried inline for transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationResponse {
    pub success: bool,
    pub results: Vec<ActionResult>,
    pub evidence: Vec<Screenshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl AutomationResponse {
    pub fn failure(error: &AutomationError, evidence: Vec<Screenshot>) -> Self {
        Self {
            success: false,
            results: Vec::new(),
            evidence,
            error: Some(ErrorBody {
                message: error.to_string(),
                detail: error.detail(),
            }),
        }
    }
}

/// What guided login discovery finds on the current page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDescriptor {
    pub inputs: Vec<FormField>,
    pub submit: Option<FormField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub tag: String,
    #[serde(default, rename = "type")]
    pub input_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl AutomationRequest {
    /// Rejects malformed submissions before any browser interaction.
    pub fn validate(&self) -> Result<url::Url, AutomationError> {
        let parsed = parse_target(&self.target_address)?;
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(AutomationError::InvalidInput(format!(
                "speed must be a positive number, got {}",
                self.speed
            )));
        }
        Ok(parsed)
    }
}

/// Parses an absolute http(s) URI or explains why it is not one.
pub fn parse_target(address: &str) -> Result<url::Url, AutomationError> {
    let parsed = url::Url::parse(address)
        .map_err(|e| AutomationError::InvalidInput(format!("invalid target address: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(AutomationError::InvalidInput(format!(
            "target address must be an absolute http(s) URI: {address}"
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(address: &str, speed: f64) -> AutomationRequest {
        AutomationRequest {
            target_address: address.to_string(),
            actions: Vec::new(),
            cookies: None,
            cookie_string: None,
            speed,
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(request("https://example.test/login", 1.0).validate().is_ok());
    }

    #[test]
    fn relative_address_is_invalid_input() {
        let err = request("/loadboard/abc", 1.0).validate().unwrap_err();
        assert!(matches!(err, AutomationError::InvalidInput(_)));
    }

    #[test]
    fn non_http_scheme_is_invalid_input() {
        let err = request("file:///etc/passwd", 1.0).validate().unwrap_err();
        assert!(matches!(err, AutomationError::InvalidInput(_)));
    }

    #[test]
    fn non_positive_speed_is_invalid_input() {
        for speed in [0.0, -2.0, f64::NAN] {
            let err = request("https://example.test", speed).validate().unwrap_err();
            assert!(matches!(err, AutomationError::InvalidInput(_)));
        }
    }

    #[test]
    fn request_accepts_legacy_field_names() {
        let req: AutomationRequest = serde_json::from_str(
            r##"{"url":"https://example.test","actions":[{"type":"click","target":"#go"}]}"##,
        )
        .unwrap();
        assert_eq!(req.target_address, "https://example.test");
        assert_eq!(req.actions[0].kind, "click");
        assert_eq!(req.speed, 1.0);
    }

    #[test]
    fn unknown_action_kind_still_parses() {
        let action: Action =
            serde_json::from_str(r#"{"kind":"hover","target":".menu"}"#).unwrap();
        assert_eq!(action.kind, "hover");
        assert_eq!(action.value, None);
    }

    #[test]
    fn action_order_is_preserved() {
        let req: AutomationRequest = serde_json::from_str(
            r##"{"targetAddress":"https://example.test","actions":[
                {"kind":"click","target":"#a"},
                {"kind":"input","target":"#b","value":"x"},
                {"kind":"select","target":"#c","value":"y"}
            ]}"##,
        )
        .unwrap();
        let kinds: Vec<&str> = req.actions.iter().map(|a| a.kind.as_str()).collect();
        assert_eq!(kinds, ["click", "input", "select"]);
    }
}
