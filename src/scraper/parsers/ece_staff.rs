//! NUS CDE electrical & computer engineering staff profiles (WordPress).

use scraper::Html;

use super::{absolute_url, select_all, select_one, text_of, text_tight};
use crate::models::StaffProfile;
use crate::scraper::cleaner::non_empty;

pub const BASE_URL: &str = "https://cde.nus.edu.sg";

const TITLE_SELECTORS: &[&str] = &[".people-meta h4", ".staff-title h4", ".staff-designation h4"];

pub fn extract_staff(url: &str, html: &str) -> StaffProfile {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let avatar_url = select_one(root, ".post-thumb img, .entry-header img")
        .and_then(|img| img.value().attr("src"))
        .and_then(|src| absolute_url(url, src));

    let name = select_one(root, "h1.entry-title").map(text_tight).unwrap_or_default();

    let mut titles: Vec<String> = Vec::new();
    for sel in TITLE_SELECTORS {
        for node in select_all(root, sel) {
            let text = text_of(node);
            if !text.is_empty() && !titles.contains(&text) {
                titles.push(text);
            }
        }
    }

    let biography = select_one(root, "#websparks-people-content-wrapper")
        .or_else(|| select_one(root, ".entry-content"))
        .and_then(|content| {
            let parts: Vec<String> = select_all(content, "p, li")
                .into_iter()
                .map(text_of)
                .filter(|t| !t.is_empty())
                .collect();
            non_empty(parts.join(" "))
        });

    let sidebar_value = |wrapper: &str| -> Option<String> {
        let wrapper = select_one(root, &format!(".{}", wrapper))?;
        let value = wrapper
            .descendants()
            .filter_map(scraper::ElementRef::wrap)
            .skip(1)
            .find(|el| el.value().classes().any(|c| c.starts_with("sidebar-")))?;
        non_empty(text_tight(value))
    };

    let sidebar_link = |wrapper: &str| -> Option<String> {
        let link = select_one(root, &format!(".{} a[href]", wrapper))?;
        let href = link.value().attr("href")?.trim();
        validate_url(href)
    };

    StaffProfile {
        url: url.to_string(),
        name,
        titles,
        avatar_url,
        biography,
        contact_number: sidebar_value("sidebar-contact-number-wrapper"),
        email: sidebar_value("sidebar-email-address-wrapper"),
        location: sidebar_value("sidebar-location-wrapper"),
        website_url: sidebar_link("sidebar-website-wrapper"),
        google_scholar_url: sidebar_link("sidebar-google-scholar-wrapper"),
    }
}

/// Scheme-less links are resolved against the site root.
fn validate_url(href: &str) -> Option<String> {
    if href.is_empty() {
        return None;
    }
    match url::Url::parse(href) {
        Ok(_) => Some(href.to_string()),
        Err(_) => absolute_url(BASE_URL, href),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"<html><body>
        <header class="entry-header"><img src="/wp-content/uploads/jane.jpg"></header>
        <h1 class="entry-title"> Jane Tan </h1>
        <div class="people-meta"><h4>Associate Professor</h4></div>
        <div class="staff-designation"><h4>Deputy Head (Research)</h4><h4>Associate Professor</h4></div>
        <div id="websparks-people-content-wrapper">
            <p>Jane works on power electronics.</p>
            <ul><li>IEEE Fellow</li></ul>
        </div>
        <aside>
          <div class="sidebar-contact-number-wrapper"><i class="icon"></i><span class="sidebar-contact-number">+65 6516 0000</span></div>
          <div class="sidebar-email-address-wrapper"><span class="sidebar-email">jane@nus.edu.sg</span></div>
          <div class="sidebar-location-wrapper"><span class="other">E4-05-01</span></div>
          <div class="sidebar-website-wrapper"><a href="/ece/lab/power/">Lab</a></div>
          <div class="sidebar-google-scholar-wrapper"><a href="https://scholar.google.com/citations?user=abc">Scholar</a></div>
        </aside>
        </body></html>"#;

    #[test]
    fn extracts_profile_and_sidebar() {
        let p = extract_staff("https://cde.nus.edu.sg/ece/staff/jane-tan", PROFILE);
        assert_eq!(p.name, "Jane Tan");
        assert_eq!(p.titles, vec!["Associate Professor", "Deputy Head (Research)"]);
        assert_eq!(
            p.avatar_url.as_deref(),
            Some("https://cde.nus.edu.sg/wp-content/uploads/jane.jpg")
        );
        assert_eq!(p.biography.as_deref(), Some("Jane works on power electronics. IEEE Fellow"));
        assert_eq!(p.contact_number.as_deref(), Some("+65 6516 0000"));
        assert_eq!(p.email.as_deref(), Some("jane@nus.edu.sg"));
        assert_eq!(p.location, None);
        assert_eq!(p.website_url.as_deref(), Some("https://cde.nus.edu.sg/ece/lab/power/"));
        assert_eq!(
            p.google_scholar_url.as_deref(),
            Some("https://scholar.google.com/citations?user=abc")
        );
    }

    #[test]
    fn empty_page_gives_empty_profile() {
        let p = extract_staff("https://cde.nus.edu.sg/ece/staff/x", "<html></html>");
        assert_eq!(p.name, "");
        assert!(p.titles.is_empty());
        assert_eq!(p.biography, None);
    }
}
