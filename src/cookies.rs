use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;

use headless_chrome::Tab;
use headless_chrome::protocol::cdp::Network::CookieParam;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AutomationError;

/// One session cookie, serialized in the CDP camelCase shape so records pass
/// through to `Network.setCookie` verbatim. No expiry or domain validation
/// happens here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

/// Distinguishes "nothing saved yet" (normal) from a file that exists but
/// does not parse (corrupt, surfaced as an error by `load`).
#[derive(Debug, PartialEq)]
pub enum CookieLoad {
    Loaded(Vec<CookieRecord>),
    Missing,
}

/// Durable storage for one session's cookies: a single JSON file,
/// overwritten on every save.
#[derive(Clone)]
pub struct CookieStore {
    path: PathBuf,
}

impl CookieStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<CookieLoad, AutomationError> {
        if !self.path.exists() {
            return Ok(CookieLoad::Missing);
        }
        let file = std::fs::File::open(&self.path).map_err(|e| {
            AutomationError::CookiePersistence(format!("open {}: {e}", self.path.display()))
        })?;
        let records: Vec<CookieRecord> =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                AutomationError::CookiePersistence(format!(
                    "corrupt cookie file {}: {e}",
                    self.path.display()
                ))
            })?;
        Ok(CookieLoad::Loaded(records))
    }

    pub fn save(&self, records: &[CookieRecord]) -> Result<(), AutomationError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AutomationError::CookiePersistence(format!("create {}: {e}", parent.display()))
            })?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| {
                AutomationError::CookiePersistence(format!("open {}: {e}", self.path.display()))
            })?;
        serde_json::to_writer_pretty(BufWriter::new(file), records)
            .map_err(|e| AutomationError::CookiePersistence(e.to_string()))?;
        debug!("saved {} cookies to {}", records.len(), self.path.display());
        Ok(())
    }
}

/// Expands the `name1=v1; name2=v2` convenience form. A part without `=`
/// becomes a cookie with an empty value; the domain defaults to the target
/// host.
pub fn expand_cookie_string(raw: &str, domain: &str) -> Vec<CookieRecord> {
    raw.split(';')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let (name, value) = part.split_once('=').unwrap_or((part, ""));
            Some(CookieRecord {
                name: name.trim().to_string(),
                value: value.to_string(),
                domain: Some(domain.to_string()),
                ..CookieRecord::default()
            })
        })
        .collect()
}

/// Replays records into the live tab one at a time; a record the browser
/// rejects is logged and skipped so the rest still apply. Returns how many
/// were applied.
pub fn apply_to_tab(tab: &Arc<Tab>, records: &[CookieRecord]) -> usize {
    let mut applied = 0;
    for record in records {
        match to_cookie_param(record) {
            Ok(param) => match tab.set_cookies(vec![param]) {
                Ok(()) => {
                    debug!("cookie set: {}", record.name);
                    applied += 1;
                }
                Err(e) => warn!("error setting cookie {}: {e:#}", record.name),
            },
            Err(e) => warn!("skipping malformed cookie {}: {e:#}", record.name),
        }
    }
    applied
}

/// Reads all cookies the active page currently holds.
pub fn collect_from_tab(tab: &Arc<Tab>) -> anyhow::Result<Vec<CookieRecord>> {
    let cookies = tab.get_cookies()?;
    let mut records = Vec::with_capacity(cookies.len());
    for cookie in cookies {
        records.push(serde_json::from_value(serde_json::to_value(cookie)?)?);
    }
    Ok(records)
}

/// CookieRecord and CookieParam share the CDP wire shape, so the conversion
/// is a serde round-trip; unknown attributes simply stay unset.
fn to_cookie_param(record: &CookieRecord) -> anyhow::Result<CookieParam> {
    Ok(serde_json::from_value(serde_json::to_value(record)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<CookieRecord> {
        vec![
            CookieRecord {
                name: "sid".into(),
                value: "abc123".into(),
                domain: Some("ops.example.test".into()),
                path: Some("/".into()),
                http_only: Some(true),
                secure: Some(true),
                same_site: Some("Lax".into()),
                ..CookieRecord::default()
            },
            CookieRecord {
                name: "theme".into(),
                value: "dark".into(),
                ..CookieRecord::default()
            },
        ]
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CookieStore::new(dir.path().join("cookies.json"));
        let records = sample();
        store.save(&records).unwrap();
        assert_eq!(store.load().unwrap(), CookieLoad::Loaded(records));
    }

    #[test]
    fn load_without_prior_save_is_missing_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CookieStore::new(dir.path().join("cookies.json"));
        assert_eq!(store.load().unwrap(), CookieLoad::Missing);
    }

    #[test]
    fn corrupt_file_is_an_error_distinct_from_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, "not json {").unwrap();
        let err = CookieStore::new(path).load().unwrap_err();
        assert!(matches!(err, AutomationError::CookiePersistence(_)));
    }

    #[test]
    fn save_overwrites_prior_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = CookieStore::new(dir.path().join("cookies.json"));
        store.save(&sample()).unwrap();
        let replacement = vec![CookieRecord {
            name: "only".into(),
            value: "one".into(),
            ..CookieRecord::default()
        }];
        store.save(&replacement).unwrap();
        assert_eq!(store.load().unwrap(), CookieLoad::Loaded(replacement));
    }

    #[test]
    fn cookie_string_expands_against_target_host() {
        let records = expand_cookie_string("sid=abc123; flag; token=a=b", "example.test");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "sid");
        assert_eq!(records[0].value, "abc123");
        assert_eq!(records[0].domain.as_deref(), Some("example.test"));
        assert_eq!(records[1].name, "flag");
        assert_eq!(records[1].value, "");
        // everything after the first '=' is the value
        assert_eq!(records[2].value, "a=b");
    }

    #[test]
    fn record_converts_to_cdp_param() {
        let param = to_cookie_param(&sample()[0]).unwrap();
        assert_eq!(param.name, "sid");
        assert_eq!(param.value, "abc123");
        assert_eq!(param.domain.as_deref(), Some("ops.example.test"));
    }
}
