use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::browser::Page;

/// One browser cookie as written to the session file.
///
/// Field names follow the browser's own JSON cookie format, so files written
/// by other automation tools load as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    /// Seconds since the epoch; -1 marks a session cookie.
    #[serde(default = "session_expiry")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn root_path() -> String {
    "/".into()
}

fn session_expiry() -> f64 {
    -1.0
}

impl StoredCookie {
    pub fn is_expired(&self, now: f64) -> bool {
        self.expires > 0.0 && self.expires <= now
    }
}

/// Install the saved session into the page's cookie jar.
///
/// A file that does not parse is deleted so the next attempt starts clean.
/// Returns `true` only when at least one live cookie was installed.
pub fn load(page: &mut impl Page, path: &Path) -> bool {
    if !path.exists() {
        info!("No saved session at {:?}", path);
        return false;
    }

    let cookies: Vec<StoredCookie> = match fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
    {
        Ok(c) => c,
        Err(e) => {
            error!("Error loading session from {:?}: {}", path, e);
            warn!("Discarding session file, re-authenticating");
            if let Err(e) = fs::remove_file(path) {
                error!("Error deleting session file {:?}: {}", path, e);
            }
            return false;
        }
    };

    let now = Utc::now().timestamp() as f64;
    let total = cookies.len();
    let live: Vec<StoredCookie> = cookies.into_iter().filter(|c| !c.is_expired(now)).collect();
    if live.is_empty() {
        warn!("Saved session has expired ({} cookies), re-authenticating", total);
        return false;
    }
    if live.len() < total {
        info!("Dropped {} expired cookies", total - live.len());
    }

    match page.add_cookies(&live) {
        Ok(()) => {
            info!("Using saved session ({} cookies)", live.len());
            true
        }
        Err(e) => {
            error!("Error installing saved session: {}", e);
            false
        }
    }
}

/// Write the page's cookie jar to `path`. Failures are logged, never raised.
pub fn save(page: &impl Page, path: &Path) {
    let result = page
        .cookies()
        .map_err(|e| e.to_string())
        .and_then(|jar| serde_json::to_string_pretty(&jar).map_err(|e| e.to_string()))
        .and_then(|json| fs::write(path, json).map_err(|e| e.to_string()));

    match result {
        Ok(()) => info!("Session saved to {:?}", path),
        Err(e) => error!("Error saving session to {:?}: {}", path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{cookie, FakePage};
    use crate::test_support::temp_path;

    #[test]
    fn save_then_load_into_fresh_context() {
        let path = temp_path("cookies.json");
        let mut page = FakePage::new();
        page.jar = vec![cookie("session_id", "abc"), cookie("theme", "dark")];
        save(&page, &path);

        let mut fresh = FakePage::new();
        assert!(load(&mut fresh, &path));
        let got: Vec<_> = fresh
            .jar
            .iter()
            .map(|c| (c.name.as_str(), c.value.as_str(), c.domain.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![("session_id", "abc", ".site.test"), ("theme", "dark", ".site.test")]
        );
        fs::remove_file(&path).ok();
    }

    #[test]
    fn malformed_file_is_removed() {
        let path = temp_path("cookies.json");
        fs::write(&path, "[{\"name\": \"sid\", \"value\": ").unwrap();

        let mut page = FakePage::new();
        assert!(!load(&mut page, &path));
        assert!(!path.exists());
        assert!(page.jar.is_empty());
    }

    #[test]
    fn wrong_shape_counts_as_malformed() {
        let path = temp_path("cookies.json");
        fs::write(&path, "{\"cookies\": 1}").unwrap();
        assert!(!load(&mut FakePage::new(), &path));
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let path = temp_path("absent.json");
        assert!(!load(&mut FakePage::new(), &path));
    }

    #[test]
    fn expired_cookies_are_dropped() {
        let path = temp_path("cookies.json");
        let mut old = cookie("old", "1");
        old.expires = 1_000_000.0;
        let mut live = cookie("live", "2");
        live.expires = 4_102_444_800.0;
        fs::write(&path, serde_json::to_string(&vec![old.clone(), live]).unwrap()).unwrap();

        let mut page = FakePage::new();
        assert!(load(&mut page, &path));
        assert_eq!(page.jar.len(), 1);
        assert_eq!(page.jar[0].name, "live");

        fs::write(&path, serde_json::to_string(&vec![old]).unwrap()).unwrap();
        let mut page = FakePage::new();
        assert!(!load(&mut page, &path));
        assert!(page.jar.is_empty());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn reads_minimal_browser_export() {
        let path = temp_path("cookies.json");
        fs::write(
            &path,
            r#"[{"name":"sid","value":"x","domain":"www.mgeko.cc","path":"/","expires":-1,"httpOnly":true,"secure":false,"sameSite":"Lax"}]"#,
        )
        .unwrap();
        let mut page = FakePage::new();
        assert!(load(&mut page, &path));
        assert!(page.jar[0].http_only);
        assert_eq!(page.jar[0].same_site.as_deref(), Some("Lax"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn save_to_unwritable_path_is_swallowed() {
        let page = FakePage::new();
        save(&page, Path::new("/nonexistent-dir/for/sure/cookies.json"));
    }
}
