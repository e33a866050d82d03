use scraper::{Html, Selector};
use tracing::info;

use crate::browser::{BrowserError, Page};
use crate::settings::AuthSettings;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no credentials configured (set auth.username and auth.password)")]
    MissingCredentials,

    #[error("invalid success selector {0:?}")]
    BadSelector(String),

    #[error("login was not accepted: {0}")]
    Rejected(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Drive the login form, then confirm the site actually signed us in.
pub fn login(page: &mut impl Page, auth: &AuthSettings) -> Result<(), AuthError> {
    let (Some(user), Some(pass)) = (auth.username.as_deref(), auth.password.as_deref()) else {
        return Err(AuthError::MissingCredentials);
    };

    page.goto(&auth.login_url)?;
    info!("Before sign-in: {}", page.current_url());
    page.fill(&auth.username_selector, user)?;
    page.fill(&auth.password_selector, pass)?;
    page.click(&auth.submit_selector)?;
    info!("After sign-in: {}", page.current_url());

    verify(&*page, auth)
}

fn verify(page: &impl Page, auth: &AuthSettings) -> Result<(), AuthError> {
    match &auth.success_selector {
        Some(marker) => {
            let selector =
                Selector::parse(marker).map_err(|_| AuthError::BadSelector(marker.clone()))?;
            let html = Html::parse_document(&page.html()?);
            if html.select(&selector).next().is_none() {
                return Err(AuthError::Rejected(format!("no {} on {}", marker, page.current_url())));
            }
        }
        None => {
            if same_page(&page.current_url(), &auth.login_url) {
                return Err(AuthError::Rejected("still on the login page".into()));
            }
        }
    }

    if page.cookies()?.is_empty() {
        return Err(AuthError::Rejected("cookie jar is empty".into()));
    }

    info!("Login confirmed");
    Ok(())
}

fn same_page(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakePage, LoginBehaviour};

    fn settings() -> AuthSettings {
        AuthSettings {
            login_url: "https://site.test/login".into(),
            username: Some("reader".into()),
            password: Some("hunter2".into()),
            ..AuthSettings::default()
        }
    }

    fn page() -> FakePage {
        FakePage::new().with_page("https://site.test/login", FakePage::login_form())
    }

    #[test]
    fn fills_named_fields_and_confirms() {
        let mut page = page();
        login(&mut page, &settings()).unwrap();
        assert_eq!(page.submits, 1);
        assert_eq!(
            page.filled,
            vec![
                ("input[name='user']".to_string(), "reader".to_string()),
                ("input[name='pass']".to_string(), "hunter2".to_string()),
            ]
        );
    }

    #[test]
    fn rejected_login_is_reported_even_with_cookies() {
        let mut page = page();
        page.behaviour = LoginBehaviour::Reject;
        let err = login(&mut page, &settings()).unwrap_err();
        assert!(matches!(err, AuthError::Rejected(_)));
        assert!(!page.jar.is_empty());
    }

    #[test]
    fn configured_marker_must_be_on_the_page() {
        let mut auth = settings();
        auth.success_selector = Some("a[href*='logout']".into());
        let mut ok = page();
        assert!(login(&mut ok, &auth).is_ok());

        auth.success_selector = Some("#member-menu".into());
        let mut moved_but_unmarked = page();
        assert!(matches!(
            login(&mut moved_but_unmarked, &auth),
            Err(AuthError::Rejected(_))
        ));
    }

    #[test]
    fn missing_credentials_skip_the_browser() {
        let mut page = page();
        let mut auth = settings();
        auth.password = None;
        assert!(matches!(login(&mut page, &auth), Err(AuthError::MissingCredentials)));
        assert!(page.visits.is_empty());
    }

    #[test]
    fn unreachable_login_page() {
        let mut page = FakePage::new();
        let err = login(&mut page, &settings()).unwrap_err();
        assert!(matches!(err, AuthError::Browser(BrowserError::Navigation { .. })));
    }
}
