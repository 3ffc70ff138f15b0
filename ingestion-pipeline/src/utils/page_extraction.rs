use common::error::AppError;
use dom_smoothie::{Article, Readability, TextMode};
use std::{net::IpAddr, time::Instant};
use tracing::{info, warn};

/// The readable page content produced by a crawl.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub content: String,
    pub title: Option<String>,
}

/// Fetch a page and reduce it to readable markdown.
pub async fn extract_page(http: &reqwest::Client, url: &str) -> Result<CrawledPage, AppError> {
    let parsed_url =
        url::Url::parse(url).map_err(|_| AppError::Validation("Invalid URL".to_string()))?;
    ensure_ingestion_url_allowed(&parsed_url)?;

    info!(%url, "Fetching URL");
    let now = Instant::now();

    let raw_content = http
        .get(parsed_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let config = dom_smoothie::Config {
        text_mode: TextMode::Markdown,
        ..Default::default()
    };
    let mut readability = Readability::new(raw_content, None, Some(config))?;
    let article: Article = readability.parse()?;

    let title = article.title.trim().to_string();
    let content = article.text_content.to_string();
    info!(%url, elapsed = ?now.elapsed(), chars = content.chars().count(), "URL extracted");

    Ok(CrawledPage {
        content,
        title: (!title.is_empty()).then_some(title),
    })
}

fn ensure_ingestion_url_allowed(url: &url::Url) -> Result<(), AppError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            warn!(%url, %scheme, "Rejected ingestion URL due to unsupported scheme");
            return Err(AppError::Validation(
                "Unsupported URL scheme for ingestion".to_string(),
            ));
        }
    }

    let Some(host) = url.host_str() else {
        warn!(%url, "Rejected ingestion URL missing host");
        return Err(AppError::Validation(
            "URL is missing a host component".to_string(),
        ));
    };

    if host.eq_ignore_ascii_case("localhost") {
        warn!(%url, host, "Rejected ingestion URL to localhost");
        return Err(AppError::Validation(
            "Ingestion URL host is not allowed".to_string(),
        ));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        let is_disallowed = match ip {
            IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
            IpAddr::V6(v6) => v6.is_unique_local() || v6.is_unicast_link_local(),
        };

        if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || is_disallowed {
            warn!(%url, host, %ip, "Rejected ingestion URL pointing to restricted network range");
            return Err(AppError::Validation(
                "Ingestion URL host is not allowed".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_scheme() {
        let url = url::Url::parse("ftp://example.com").expect("url");
        assert!(ensure_ingestion_url_allowed(&url).is_err());
    }

    #[test]
    fn rejects_localhost() {
        let url = url::Url::parse("http://localhost/resource").expect("url");
        assert!(ensure_ingestion_url_allowed(&url).is_err());
    }

    #[test]
    fn rejects_private_ipv4() {
        let url = url::Url::parse("http://192.168.1.10/index.html").expect("url");
        assert!(ensure_ingestion_url_allowed(&url).is_err());
    }

    #[test]
    fn allows_public_domain() {
        let url = url::Url::parse("https://sub.example.com/path").expect("url");
        assert!(ensure_ingestion_url_allowed(&url).is_ok());
    }
}
