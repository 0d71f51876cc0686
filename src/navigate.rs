use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use headless_chrome::Tab;
use tracing::{debug, info, warn};

use crate::error::AutomationError;

/// The slice of page behavior navigation needs. Lets the retry policy run
/// against a stub in tests and against the live tab in production.
pub trait PageDriver {
    fn current_url(&self) -> String;
    fn load(&self, url: &str) -> Result<()>;
}

pub struct TabDriver<'a> {
    tab: &'a Arc<Tab>,
}

impl<'a> TabDriver<'a> {
    pub fn new(tab: &'a Arc<Tab>) -> Self {
        Self { tab }
    }
}

impl PageDriver for TabDriver<'_> {
    fn current_url(&self) -> String {
        self.tab.get_url()
    }

    fn load(&self, url: &str) -> Result<()> {
        self.tab.navigate_to(url)?;
        self.tab.wait_until_navigated()?;
        Ok(())
    }
}

/// Drives the page to a target address with a bounded number of attempts and
/// a fixed delay before each retry.
pub struct Navigator {
    attempts: u32,
    retry_delay: Duration,
}

impl Navigator {
    pub fn new(attempts: u32, retry_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    pub fn navigate(&self, driver: &impl PageDriver, url: &str) -> Result<(), AutomationError> {
        if driver.current_url() == url {
            debug!("already at {url}, skipping reload");
            return Ok(());
        }

        let mut last_error = None;
        for attempt in 1..=self.attempts {
            if attempt > 1 {
                std::thread::sleep(self.retry_delay);
            }
            info!("navigating to {url} (attempt {attempt}/{})", self.attempts);
            match driver.load(url) {
                Ok(()) => {
                    info!("page loaded: {url}");
                    return Ok(());
                }
                Err(e) => {
                    warn!("navigation attempt {attempt} failed: {e:#}");
                    last_error = Some(e);
                }
            }
        }

        Err(AutomationError::NavigationFailed {
            url: url.to_string(),
            attempts: self.attempts,
            source: last_error.unwrap_or_else(|| anyhow::anyhow!("no attempt was made")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::Cell;

    /// Stub that fails the first `failures` loads, then succeeds.
    struct StubDriver {
        url: String,
        failures: Cell<u32>,
        loads: Cell<u32>,
    }

    impl StubDriver {
        fn new(url: &str, failures: u32) -> Self {
            Self {
                url: url.to_string(),
                failures: Cell::new(failures),
                loads: Cell::new(0),
            }
        }
    }

    impl PageDriver for StubDriver {
        fn current_url(&self) -> String {
            self.url.clone()
        }

        fn load(&self, _url: &str) -> Result<()> {
            self.loads.set(self.loads.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(anyhow!("net::ERR_CONNECTION_RESET"));
            }
            Ok(())
        }
    }

    fn navigator() -> Navigator {
        Navigator::new(3, Duration::ZERO)
    }

    #[test]
    fn navigating_to_current_address_is_a_noop() {
        let driver = StubDriver::new("https://example.test/board", 0);
        navigator()
            .navigate(&driver, "https://example.test/board")
            .unwrap();
        assert_eq!(driver.loads.get(), 0);
    }

    #[test]
    fn succeeds_on_third_attempt_after_two_failures() {
        let driver = StubDriver::new("about:blank", 2);
        navigator()
            .navigate(&driver, "https://example.test")
            .unwrap();
        assert_eq!(driver.loads.get(), 3);
    }

    #[test]
    fn exhausted_retries_surface_navigation_failed() {
        let driver = StubDriver::new("about:blank", u32::MAX);
        let err = navigator()
            .navigate(&driver, "https://example.test")
            .unwrap_err();
        match err {
            AutomationError::NavigationFailed { url, attempts, .. } => {
                assert_eq!(url, "https://example.test");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(driver.loads.get(), 3);
    }
}
