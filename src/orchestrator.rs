use std::collections::HashMap;
use std::sync::Arc;

use headless_chrome::Tab;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::cookies::{self, CookieLoad, CookieStore};
use crate::error::AutomationError;
use crate::evidence::EvidenceCollector;
use crate::executor;
use crate::login::{LoginAttempt, LoginFlow, LoginState};
use crate::navigate::{Navigator, TabDriver};
use crate::progress::{self, EvidenceRef, RunEvent};
use crate::session::BrowserSession;
use crate::types::{
    AutomationRequest, AutomationResponse, ErrorBody, FormDescriptor, Screenshot, parse_target,
};

/// Work items for the orchestrator. The single-consumer loop is the
/// mutual-exclusion guard around the shared session: one command runs to
/// completion before the next is taken.
pub enum Command {
    Automate {
        request: AutomationRequest,
        respond: oneshot::Sender<AutomationResponse>,
    },
    DiscoverForm {
        target: String,
        respond: oneshot::Sender<Result<FormDescriptor, AutomationError>>,
    },
    SubmitLogin {
        target: String,
        credentials: HashMap<String, String>,
        respond: oneshot::Sender<Result<LoginAttempt, AutomationError>>,
    },
    ManualLogin {
        target: String,
        respond: oneshot::Sender<Result<(), AutomationError>>,
    },
}

pub struct Orchestrator {
    config: Config,
    session: Option<BrowserSession>,
    login_state: LoginState,
    store: CookieStore,
    evidence: EvidenceCollector,
    events: broadcast::Sender<RunEvent>,
}

impl Orchestrator {
    pub fn new(config: Config, events: broadcast::Sender<RunEvent>) -> anyhow::Result<Self> {
        let store = CookieStore::new(config.cookie_file());
        let evidence = EvidenceCollector::new(config.screenshot_dir.clone())?;
        Ok(Self {
            config,
            session: None,
            login_state: LoginState::AwaitingFormDiscovery,
            store,
            evidence,
            events,
        })
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                maybe = commands.recv() => match maybe {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = &mut ctrl_c => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        if self.session.take().is_some() {
            info!("closing browser");
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Automate { request, respond } => {
                let response = self.automate(request).await;
                let _ = respond.send(response);
            }
            Command::DiscoverForm { target, respond } => {
                let _ = respond.send(self.discover_form(target).await);
            }
            Command::SubmitLogin {
                target,
                credentials,
                respond,
            } => {
                let _ = respond.send(self.submit_login(target, credentials).await);
            }
            Command::ManualLogin { target, respond } => {
                let _ = respond.send(self.manual_login(target).await);
            }
        }
    }

    /// Launches the browser on first use and reuses it afterwards. Launch
    /// failures propagate; there is no launch retry.
    async fn ensure_session(&mut self) -> Result<Arc<Tab>, AutomationError> {
        if let Some(session) = &self.session {
            return Ok(session.tab.clone());
        }

        let interactive = self.config.interactive;
        let timeout = self.config.nav_timeout();
        let session = tokio::task::spawn_blocking(move || BrowserSession::launch(interactive, timeout))
            .await
            .map_err(|e| {
                AutomationError::SessionUnavailable(anyhow::anyhow!("browser launch panicked: {e}"))
            })?
            .map_err(AutomationError::SessionUnavailable)?;

        let tab = session.tab.clone();
        let evidence = self.evidence.clone();
        let shot_tab = tab.clone();
        let _ = tokio::task::spawn_blocking(move || evidence.capture(&shot_tab, "after_page_creation"))
            .await;

        self.session = Some(session);
        Ok(tab)
    }

    async fn automate(&mut self, request: AutomationRequest) -> AutomationResponse {
        let tab = match self.ensure_session().await {
            Ok(tab) => tab,
            Err(e) => {
                warn!("{e}");
                return AutomationResponse::failure(&e, Vec::new());
            }
        };

        let config = self.config.clone();
        let store = self.store.clone();
        let evidence = self.evidence.clone();
        let events = self.events.clone();

        match tokio::task::spawn_blocking(move || {
            run_automation(&tab, &config, &store, &evidence, &events, request)
        })
        .await
        {
            Ok(response) => response,
            Err(e) => AutomationResponse {
                success: false,
                results: Vec::new(),
                evidence: Vec::new(),
                error: Some(ErrorBody {
                    message: format!("automation run panicked: {e}"),
                    detail: None,
                }),
            },
        }
    }

    async fn discover_form(&mut self, target: String) -> Result<FormDescriptor, AutomationError> {
        if self.config.interactive {
            return Err(AutomationError::InvalidInput(
                "guided form login is only available in headless deployments".into(),
            ));
        }
        parse_target(&target)?;
        let tab = self.ensure_session().await?;
        let navigator = self.navigator();
        let state = self.login_state;

        let (result, state) = tokio::task::spawn_blocking(move || {
            let mut flow = LoginFlow { state };
            let result = flow.begin(&tab, &navigator, &target);
            (result, flow.state)
        })
        .await
        .map_err(|e| AutomationError::SessionUnavailable(anyhow::anyhow!("login task panicked: {e}")))?;

        self.login_state = state;
        result
    }

    async fn submit_login(
        &mut self,
        target: String,
        credentials: HashMap<String, String>,
    ) -> Result<LoginAttempt, AutomationError> {
        if self.config.interactive {
            return Err(AutomationError::InvalidInput(
                "guided form login is only available in headless deployments".into(),
            ));
        }
        parse_target(&target)?;
        let tab = self.ensure_session().await?;
        let store = self.store.clone();
        let state = self.login_state;

        let (result, state) = tokio::task::spawn_blocking(move || {
            let mut flow = LoginFlow { state };
            let result = flow.submit(&tab, &store, &target, &credentials);
            (result, flow.state)
        })
        .await
        .map_err(|e| AutomationError::SessionUnavailable(anyhow::anyhow!("login task panicked: {e}")))?;

        self.login_state = state;
        result
    }

    async fn manual_login(&mut self, target: String) -> Result<(), AutomationError> {
        if !self.config.interactive {
            return Err(AutomationError::InvalidInput(
                "manual login requires an interactive (visible) deployment".into(),
            ));
        }
        parse_target(&target)?;
        let tab = self.ensure_session().await?;
        let navigator = self.navigator();
        let store = self.store.clone();
        let wait = self.config.login_wait();
        let state = self.login_state;

        let (result, state) = tokio::task::spawn_blocking(move || {
            let mut flow = LoginFlow { state };
            let result = flow.manual(&tab, &navigator, &store, &target, wait);
            (result, flow.state)
        })
        .await
        .map_err(|e| AutomationError::SessionUnavailable(anyhow::anyhow!("login task panicked: {e}")))?;

        self.login_state = state;
        result
    }

    fn navigator(&self) -> Navigator {
        Navigator::new(self.config.nav_attempts, self.config.nav_retry_delay())
    }
}

/// One full automation run against the live tab. Runs on a blocking thread;
/// per-action progress events and evidence capture interleave with execution
/// through the executor's step callback.
fn run_automation(
    tab: &Arc<Tab>,
    config: &Config,
    store: &CookieStore,
    evidence: &EvidenceCollector,
    events: &broadcast::Sender<RunEvent>,
    request: AutomationRequest,
) -> AutomationResponse {
    let mut shots: Vec<Screenshot> = Vec::new();
    let capture = |tab: &Arc<Tab>, label: &str, shots: &mut Vec<Screenshot>| {
        if let Some(shot) = evidence.capture(tab, label) {
            shots.push(shot);
        }
    };

    let parsed = match request.validate() {
        Ok(parsed) => parsed,
        Err(e) => return AutomationResponse::failure(&e, shots),
    };

    capture(tab, "before_setting_cookies", &mut shots);

    let mut records = request.cookies.clone().unwrap_or_default();
    if let Some(raw) = &request.cookie_string {
        if let Some(host) = parsed.host_str() {
            records.extend(cookies::expand_cookie_string(raw, host));
        }
    }
    if records.is_empty() {
        match store.load() {
            Ok(CookieLoad::Loaded(stored)) => {
                info!("restoring {} stored cookies", stored.len());
                records = stored;
            }
            Ok(CookieLoad::Missing) => debug!("no stored cookies to restore"),
            Err(e) => warn!("{e}"),
        }
    }
    if !records.is_empty() {
        let applied = cookies::apply_to_tab(tab, &records);
        info!("applied {applied}/{} cookies", records.len());
    }

    capture(tab, "after_setting_cookies", &mut shots);

    let navigator = Navigator::new(config.nav_attempts, config.nav_retry_delay());
    if let Err(e) = navigator.navigate(&TabDriver::new(tab), &request.target_address) {
        warn!("{e}");
        capture(tab, "error", &mut shots);
        return AutomationResponse::failure(&e, shots);
    }

    capture(tab, "after_page_load", &mut shots);

    let execution = executor::execute(
        tab,
        &request.actions,
        config.pace_interval_ms,
        request.speed,
        |result| {
            progress::publish(
                events,
                RunEvent::ActionStepCompleted {
                    result: result.clone(),
                },
            );
            capture(tab, &format!("after_action_{}", result.action.kind), &mut shots);
        },
    );

    let results = match execution {
        Ok(results) => results,
        Err(e) => {
            warn!("action execution aborted: {e:#}");
            capture(tab, "error", &mut shots);
            return AutomationResponse {
                success: false,
                results: Vec::new(),
                evidence: shots,
                error: Some(ErrorBody {
                    message: "action execution failed".into(),
                    detail: Some(format!("{e:#}")),
                }),
            };
        }
    };

    capture(tab, "final", &mut shots);

    progress::publish(
        events,
        RunEvent::RunCompleted {
            results: results.clone(),
            evidence: shots.iter().map(EvidenceRef::from).collect(),
        },
    );

    AutomationResponse {
        success: true,
        results,
        evidence: shots,
        error: None,
    }
}
