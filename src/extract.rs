use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::browser::{BrowserError, Page};
use crate::db::TitleRecord;

const TITLE: &str = "h1.novel-title";
const RATING: &str = "div.rating-star > strong";
const USER_RATED: &str = "div.rating-star > strong > span";
const CHAPTERS: &str = "div.header-stats > span:nth-child(1) > strong:nth-child(1)";
const VIEWS: &str = "div.header-stats > span:nth-child(2) > strong:nth-child(1)";
const BOOKMARKED: &str = "div.header-stats > span:nth-child(3) > strong:nth-child(1)";
const LAST_UPDATE: &str = "div.updinfo > strong:nth-child(2)";

// Material icon ligatures rendered as text inside the stat badges.
const ICON_CHAPTERS: &str = "book";
const ICON_VIEWS: &str = "supervised_user_circle";
const ICON_BOOKMARKS: &str = "bookmark";

/// Why a URL produced no record.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    Navigation(#[from] BrowserError),

    #[error("missing {field} ({selector})")]
    MissingField {
        field: &'static str,
        selector: &'static str,
    },
}

/// Navigate the shared tab to `url` and read its metadata.
pub fn scrape(page: &mut impl Page, url: &str) -> Result<TitleRecord, ExtractError> {
    page.goto(url)?;
    let html = page.html()?;
    extract_record(url, &html)
}

pub fn extract_record(url: &str, html: &str) -> Result<TitleRecord, ExtractError> {
    let doc = Html::parse_document(html);

    let rating = first_token(&text(&doc, "rating", RATING)?).ok_or(ExtractError::MissingField {
        field: "rating",
        selector: RATING,
    })?;

    let record = TitleRecord {
        url: url.to_string(),
        title: text(&doc, "title", TITLE)?.trim().to_string(),
        rating,
        user_rated: text(&doc, "user_rated", USER_RATED)?
            .replace(['(', ')'], "")
            .trim()
            .to_string(),
        chapters: strip_icon(&text(&doc, "chapters", CHAPTERS)?, ICON_CHAPTERS),
        views: strip_icon(&text(&doc, "views", VIEWS)?, ICON_VIEWS),
        bookmarked: strip_icon(&text(&doc, "bookmarked", BOOKMARKED)?, ICON_BOOKMARKS),
        last_update: text(&doc, "last_update", LAST_UPDATE)?.trim().to_string(),
    };
    debug!("Extracted {:?}", record);
    Ok(record)
}

fn text(doc: &Html, field: &'static str, selector: &'static str) -> Result<String, ExtractError> {
    // Selector strings are constants; a parse failure is treated like a miss.
    let missing = || ExtractError::MissingField { field, selector };
    let sel = Selector::parse(selector).map_err(|_| missing())?;
    doc.select(&sel).next().map(inner_text).ok_or_else(missing)
}

/// Text content with whitespace runs collapsed to single spaces.
fn inner_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_token(s: &str) -> Option<String> {
    s.split_whitespace().next().map(str::to_string)
}

fn strip_icon(s: &str, icon: &str) -> String {
    s.replace(icon, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakePage;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn full_title_page() {
        let r = extract_record("https://www.mgeko.cc/manga/solo-leveling/", &fixture("title")).unwrap();
        assert_eq!(r.title, "Solo Leveling");
        assert_eq!(r.rating, "4.7");
        assert_eq!(r.user_rated, "2,314");
        assert_eq!(r.chapters, "201");
        assert_eq!(r.views, "12.3M");
        assert_eq!(r.bookmarked, "98,211");
        assert_eq!(r.last_update, "2 days ago");
    }

    #[test]
    fn missing_stats_block() {
        let err = extract_record("https://www.mgeko.cc/manga/x/", &fixture("no_stats")).unwrap_err();
        match err {
            ExtractError::MissingField { field, .. } => assert_eq!(field, "chapters"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_rating_is_a_miss() {
        let html = fixture("title")
            .replace("4.7 ", "")
            .replace("<span>(2,314)</span>", "");
        let err = extract_record("u", &html).unwrap_err();
        assert!(matches!(err, ExtractError::MissingField { field: "rating", .. }));
    }

    #[test]
    fn values_are_not_coerced() {
        let html = fixture("title").replace("201", "n/a");
        let r = extract_record("u", &html).unwrap();
        assert_eq!(r.chapters, "n/a");
    }

    #[test]
    fn scrape_uses_the_shared_tab() {
        let url = "https://www.mgeko.cc/manga/solo-leveling/";
        let mut page = FakePage::new().with_page(url, &fixture("title"));
        let r = scrape(&mut page, url).unwrap();
        assert_eq!(r.url, url);
        assert_eq!(page.visits, vec![url.to_string()]);

        let err = scrape(&mut page, "https://www.mgeko.cc/gone/").unwrap_err();
        assert!(matches!(err, ExtractError::Navigation(_)));
    }

    #[test]
    fn icon_tokens() {
        assert_eq!(strip_icon(" book 12 ", ICON_CHAPTERS), "12");
        assert_eq!(strip_icon("bookmark 7", ICON_BOOKMARKS), "7");
        assert_eq!(first_token("4.5 (10)").as_deref(), Some("4.5"));
        assert_eq!(first_token("   "), None);
    }
}
