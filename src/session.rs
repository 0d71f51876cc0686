use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use headless_chrome::protocol::cdp::Network;
use headless_chrome::protocol::cdp::types::Event as CdpEvent;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info, trace, warn};

/// The one shared browser session: a single Chrome process and a single tab,
/// created on first use and reused until process shutdown.
pub struct BrowserSession {
    _browser: Browser,
    pub tab: Arc<Tab>,
}

impl BrowserSession {
    /// Launches Chrome exactly once. `interactive` opens a visible window for
    /// manual login deployments; otherwise Chrome runs headless.
    pub fn launch(interactive: bool, nav_timeout: Duration) -> Result<Self> {
        info!("launching new browser instance (interactive: {interactive})");

        let chrome_path = std::env::var_os("CHROME_PATH").map(PathBuf::from);
        if let Some(ref path) = chrome_path {
            debug!("using Chrome executable from CHROME_PATH: {}", path.display());
        }

        let options = LaunchOptions {
            headless: !interactive,
            sandbox: false,
            path: chrome_path,
            window_size: Some((1366, 768)),
            args: vec![
                OsStr::new("--disable-setuid-sandbox"),
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
            ],
            // the shared session must survive idle gaps between requests
            idle_browser_timeout: Duration::from_secs(24 * 60 * 60),
            ..Default::default()
        };

        let browser = Browser::new(options).context("browser launch failed")?;
        info!("browser instance created");

        let tab = browser.new_tab().context("page creation failed")?;
        tab.set_default_timeout(nav_timeout);
        tab.navigate_to("about:blank")?;
        info!("new page created");

        if let Err(e) = register_diagnostics(&tab) {
            warn!("could not register page diagnostics: {e:#}");
        }

        Ok(Self {
            _browser: browser,
            tab,
        })
    }
}

/// Wires the page's console output, script errors, and network traffic into
/// the process log.
fn register_diagnostics(tab: &Arc<Tab>) -> Result<()> {
    tab.enable_log()?;
    tab.enable_runtime()?;
    tab.call_method(Network::Enable {
        max_total_buffer_size: None,
        max_resource_buffer_size: None,
        max_post_data_size: None,
        enable_durable_messages: None,
        report_direct_socket_traffic: None,
    })?;

    tab.add_event_listener(Arc::new(move |event: &CdpEvent| match event {
        CdpEvent::RuntimeConsoleAPICalled(e) => {
            debug!("browser console: {}", format_console_args(&e.params.args));
        }
        CdpEvent::RuntimeExceptionThrown(e) => {
            debug!("browser page error: {}", e.params.exception_details.text);
        }
        CdpEvent::LogEntryAdded(e) => {
            debug!("browser log [{:?}]: {}", e.params.entry.level, e.params.entry.text);
        }
        CdpEvent::NetworkRequestWillBeSent(e) => {
            trace!("browser request: {} {}", e.params.request.method, e.params.request.url);
        }
        CdpEvent::NetworkResponseReceived(e) => {
            trace!("browser response: {} {}", e.params.response.status, e.params.response.url);
        }
        _ => {}
    }))?;

    Ok(())
}

fn format_console_args(args: &[headless_chrome::protocol::cdp::Runtime::RemoteObject]) -> String {
    args.iter()
        .map(|arg| {
            arg.value
                .as_ref()
                .map(|v| v.to_string())
                .or_else(|| arg.description.clone())
                .unwrap_or_else(|| "<object>".to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}
