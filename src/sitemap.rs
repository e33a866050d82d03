use anyhow::Result;
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use regex::Regex;
use reqwest::StatusCode;
use tracing::{error, info};

/// Fetch the sitemap and return its page URLs in document order.
///
/// Failures are reported and yield an empty list; the caller then simply has
/// nothing to crawl.
pub async fn fetch_urls(
    client: &reqwest::Client,
    sitemap_url: &str,
    include: Option<&Regex>,
) -> Vec<String> {
    info!("Fetching sitemap from {}...", sitemap_url);

    let response = match client.get(sitemap_url).send().await {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to fetch sitemap: {}", e);
            return Vec::new();
        }
    };

    let status = response.status();
    let body = match response.text().await {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to read sitemap body: {}", e);
            return Vec::new();
        }
    };

    let urls = urls_from_response(status, &body, include);
    info!("Fetched {} URLs from the sitemap.", urls.len());
    urls
}

fn urls_from_response(status: StatusCode, body: &str, include: Option<&Regex>) -> Vec<String> {
    if status != StatusCode::OK {
        error!("Failed to fetch sitemap, status code: {}", status.as_u16());
        return Vec::new();
    }

    let all_urls = match parse_urlset(body) {
        Ok(u) => u,
        Err(e) => {
            error!("Failed to parse sitemap: {}", e);
            return Vec::new();
        }
    };

    match include {
        Some(re) => {
            let total = all_urls.len();
            let kept: Vec<String> = all_urls.into_iter().filter(|u| re.is_match(u)).collect();
            info!("{} of {} URLs match the include pattern", kept.len(), total);
            kept
        }
        None => all_urls,
    }
}

const SITEMAP_NS: &[u8] = b"http://www.sitemaps.org/schemas/sitemap/0.9";

/// Parse a urlset XML and return all <loc> URLs.
///
/// Only `<url>` children of the root and their direct `<loc>` child count,
/// and both must resolve to the sitemap 0.9 namespace. Extension elements such
/// as `<image:loc>` are skipped; a prefixed sitemap namespace (`<sm:url>`)
/// parses the same as the default one.
pub fn parse_urlset(xml: &str) -> Result<Vec<String>> {
    let mut reader = NsReader::from_str(xml);
    let mut urls = Vec::new();
    let mut depth = 0usize;
    let mut in_url = false;
    let mut loc: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_resolved_event_into(&mut buf) {
            Ok((ns, Event::Start(e))) => {
                depth += 1;
                match sitemap_tag(&ns, e.local_name().as_ref()) {
                    Some(b"url") if depth == URL_DEPTH => in_url = true,
                    Some(b"loc") if in_url && depth == LOC_DEPTH => loc = Some(String::new()),
                    _ => {}
                }
            }
            Ok((_, Event::Text(e))) if depth == LOC_DEPTH => {
                if let Some(l) = loc.as_mut() {
                    l.push_str(&e.unescape()?);
                }
            }
            Ok((_, Event::CData(e))) if depth == LOC_DEPTH => {
                if let Some(l) = loc.as_mut() {
                    l.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok((ns, Event::End(e))) => {
                match sitemap_tag(&ns, e.local_name().as_ref()) {
                    Some(b"loc") if depth == LOC_DEPTH => {
                        if let Some(l) = loc.take() {
                            urls.push(l.trim().to_string());
                        }
                    }
                    Some(b"url") if depth == URL_DEPTH => in_url = false,
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Ok((_, Event::Eof)) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }
    Ok(urls)
}

// urlset > url > loc
const URL_DEPTH: usize = 2;
const LOC_DEPTH: usize = 3;

fn sitemap_tag<'a>(ns: &ResolveResult, local: &'a [u8]) -> Option<&'a [u8]> {
    match ns {
        ResolveResult::Bound(Namespace(uri)) if *uri == SITEMAP_NS => Some(local),
        _ => None,
    }
}
