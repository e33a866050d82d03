//! Seam between the crawler and the browser engine.
//!
//! Everything above this module talks to a [`Page`]: one tab that can be
//! navigated, queried for its rendered HTML, typed into, clicked, and whose
//! cookie jar can be read and seeded. [`ChromePage`] drives a real headless
//! Chrome through `headless_chrome`; tests use a scripted fake.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use headless_chrome::protocol::cdp::Network::{Cookie, CookieParam};
use headless_chrome::protocol::cdp::Page as Cdp;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info};

use crate::session::StoredCookie;
use crate::settings::BrowserSettings;

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("cookie jar error: {0}")]
    Cookies(String),

    #[error("page content unavailable: {0}")]
    Content(String),
}

/// A single browser tab, reused for every request of a run.
pub trait Page {
    /// Navigate and block until the page has finished loading.
    fn goto(&mut self, url: &str) -> Result<(), BrowserError>;
    fn current_url(&self) -> String;
    /// Rendered document HTML.
    fn html(&self) -> Result<String, BrowserError>;
    fn fill(&mut self, selector: &str, value: &str) -> Result<(), BrowserError>;
    /// Click and wait for any navigation it triggers.
    fn click(&mut self, selector: &str) -> Result<(), BrowserError>;
    fn cookies(&self) -> Result<Vec<StoredCookie>, BrowserError>;
    fn add_cookies(&mut self, cookies: &[StoredCookie]) -> Result<(), BrowserError>;
}

pub struct ChromePage {
    // Dropping the browser kills the Chrome process, so it lives as long as the tab.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromePage {
    pub fn launch(settings: &BrowserSettings) -> Result<Self, BrowserError> {
        let options = LaunchOptions::default_builder()
            .headless(settings.headless)
            .window_size(Some((settings.window_width, settings.window_height)))
            .args(vec![OsStr::new("--disable-blink-features=AutomationControlled")])
            .idle_browser_timeout(settings.timeout().max(std::time::Duration::from_secs(60)))
            .build()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let browser = Browser::new(options).map_err(|e| BrowserError::Launch(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        tab.set_default_timeout(settings.timeout());

        if let Some(ua) = &settings.user_agent {
            tab.set_user_agent(ua, None, None)
                .map_err(|e| BrowserError::Launch(e.to_string()))?;
        }

        info!(
            "Launched Chrome (headless: {}, timeout: {}s)",
            settings.headless, settings.timeout_secs
        );
        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    pub fn screenshot(&self, path: &Path) -> Result<(), BrowserError> {
        let png = self
            .tab
            .capture_screenshot(Cdp::CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| BrowserError::Content(format!("screenshot failed: {}", e)))?;
        std::fs::write(path, png)
            .map_err(|e| BrowserError::Content(format!("writing {:?}: {}", path, e)))
    }
}

impl Page for ChromePage {
    fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        debug!("goto {}", url);
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map(|_| ())
            .map_err(|e| BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    fn current_url(&self) -> String {
        self.tab.get_url()
    }

    fn html(&self) -> Result<String, BrowserError> {
        self.tab
            .get_content()
            .map_err(|e| BrowserError::Content(e.to_string()))
    }

    fn fill(&mut self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let element = self
            .tab
            .wait_for_element(selector)
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
        element
            .click()
            .and_then(|el| el.type_into(value))
            .map(|_| ())
            .map_err(|e| BrowserError::Content(format!("typing into {}: {}", selector, e)))
    }

    fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
        let element = self
            .tab
            .wait_for_element(selector)
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
        element
            .click()
            .map_err(|e| BrowserError::Content(format!("clicking {}: {}", selector, e)))?;
        self.tab
            .wait_until_navigated()
            .map(|_| ())
            .map_err(|e| BrowserError::Navigation {
                url: self.tab.get_url(),
                reason: e.to_string(),
            })
    }

    fn cookies(&self) -> Result<Vec<StoredCookie>, BrowserError> {
        let jar = self
            .tab
            .get_cookies()
            .map_err(|e| BrowserError::Cookies(e.to_string()))?;
        jar.iter().map(from_cdp).collect()
    }

    fn add_cookies(&mut self, cookies: &[StoredCookie]) -> Result<(), BrowserError> {
        let params = cookies
            .iter()
            .map(to_cdp)
            .collect::<Result<Vec<_>, _>>()?;
        self.tab
            .set_cookies(params)
            .map_err(|e| BrowserError::Cookies(e.to_string()))
    }
}

// The CDP types and the stored format share camelCase JSON field names, so the
// conversion goes through serde rather than naming every protocol field.
fn from_cdp(cookie: &Cookie) -> Result<StoredCookie, BrowserError> {
    serde_json::to_value(cookie)
        .and_then(serde_json::from_value)
        .map_err(|e| BrowserError::Cookies(e.to_string()))
}

fn to_cdp(cookie: &StoredCookie) -> Result<CookieParam, BrowserError> {
    let mut value = serde_json::to_value(cookie).map_err(|e| BrowserError::Cookies(e.to_string()))?;
    if let Some(obj) = value.as_object_mut() {
        // Session cookies are reported with expires = -1; CDP wants the field absent.
        if obj.get("expires").and_then(|v| v.as_f64()).is_some_and(|t| t <= 0.0) {
            obj.remove("expires");
        }
        obj.retain(|_, v| !v.is_null());
    }
    serde_json::from_value(value).map_err(|e| BrowserError::Cookies(e.to_string()))
}

#[cfg(test)]
pub mod fake {
    //! Scripted in-memory [`Page`] for tests.

    use std::collections::HashMap;

    use super::{BrowserError, Page};
    use crate::session::StoredCookie;

    /// What happens when the login form is submitted.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub enum LoginBehaviour {
        Accept,
        Reject,
    }

    pub struct FakePage {
        pub pages: HashMap<String, String>,
        pub url: String,
        pub jar: Vec<StoredCookie>,
        pub filled: Vec<(String, String)>,
        pub visits: Vec<String>,
        pub submits: usize,
        pub login_url: String,
        pub submit_selector: String,
        pub behaviour: LoginBehaviour,
    }

    impl FakePage {
        pub fn new() -> Self {
            Self {
                pages: HashMap::new(),
                url: "about:blank".into(),
                jar: Vec::new(),
                filled: Vec::new(),
                visits: Vec::new(),
                submits: 0,
                login_url: "https://site.test/login".into(),
                submit_selector: "button.login100-form-btn".into(),
                behaviour: LoginBehaviour::Accept,
            }
        }

        pub fn with_page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }

        pub fn login_form() -> &'static str {
            r#"<html><body><form>
                <input name="user"><input name="pass" type="password">
                <button class="login100-form-btn">Login</button>
            </form></body></html>"#
        }
    }

    pub fn cookie(name: &str, value: &str) -> StoredCookie {
        StoredCookie {
            name: name.into(),
            value: value.into(),
            domain: ".site.test".into(),
            path: "/".into(),
            expires: -1.0,
            http_only: true,
            secure: true,
            same_site: Some("Lax".into()),
        }
    }

    impl Page for FakePage {
        fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
            self.visits.push(url.to_string());
            if !self.pages.contains_key(url) {
                return Err(BrowserError::Navigation {
                    url: url.to_string(),
                    reason: "net::ERR_NAME_NOT_RESOLVED".into(),
                });
            }
            self.url = url.to_string();
            Ok(())
        }

        fn current_url(&self) -> String {
            self.url.clone()
        }

        fn html(&self) -> Result<String, BrowserError> {
            self.pages
                .get(&self.url)
                .cloned()
                .ok_or_else(|| BrowserError::Content("blank page".into()))
        }

        fn fill(&mut self, selector: &str, value: &str) -> Result<(), BrowserError> {
            self.filled.push((selector.to_string(), value.to_string()));
            Ok(())
        }

        fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
            if selector != self.submit_selector || self.url != self.login_url {
                return Err(BrowserError::ElementNotFound(selector.to_string()));
            }
            self.submits += 1;
            match self.behaviour {
                LoginBehaviour::Accept => {
                    self.jar.push(cookie("session_id", "s3cr3t"));
                    self.url = "https://site.test/account".into();
                    self.pages.insert(
                        self.url.clone(),
                        r#"<html><body><a href="/logout">Sign out</a></body></html>"#.into(),
                    );
                }
                LoginBehaviour::Reject => {
                    // tracking cookie only, form shown again
                    self.jar.push(cookie("_ga", "GA1.1"));
                }
            }
            Ok(())
        }

        fn cookies(&self) -> Result<Vec<StoredCookie>, BrowserError> {
            Ok(self.jar.clone())
        }

        fn add_cookies(&mut self, cookies: &[StoredCookie]) -> Result<(), BrowserError> {
            self.jar.extend_from_slice(cookies);
            Ok(())
        }
    }
}
