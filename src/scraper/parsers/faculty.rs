//! NUS Computing faculty directory and profile pages.
//!
//! Profile pages are hand-edited HTML: most sections are an `<h3>` banner
//! followed by loose siblings, so the extraction below is a set of
//! independent heuristics, each tolerant of the section being absent.

use std::sync::LazyLock;

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html};

use super::{
    Extracted, absolute_url, child_elements, has_class, is_named, next_in_document,
    select_all, select_one, text_joined, text_of,
};
use crate::models::{AlumniPlacement, FacultyProfile, ListingLink, Publication, ResearchProject};
use crate::scraper::cleaner::{collapse_whitespace, non_empty, truncate_chars};

pub const BASE_URL: &str = "https://www.comp.nus.edu.sg";
const EMAIL_DOMAIN: &str = "comp.nus.edu.sg";

const DEGREES: &[&str] = &["Ph.D.", "M.Sc.", "B.Sc.", "M.A.", "B.A.", "M.Phil"];
const MAX_PROJECTS: usize = 5;
const MAX_DESCRIPTION_CHARS: usize = 500;
const MAX_CITATION_CHARS: usize = 500;
const MAX_PUB_TITLE_CHARS: usize = 150;
const MIN_PROFILE_PARAGRAPH_CHARS: usize = 50;
const MAX_PROFILE_PARAGRAPHS: usize = 3;

static QUOTED_TITLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]+)""#).expect("static regex"));
static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{4})").expect("static regex"));

fn is_part_time(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("part-time") || lower.contains("part time")
}

fn mentions_degree(text: &str) -> bool {
    DEGREES.iter().any(|d| text.contains(d))
}

// ── Directory ─────────────────────────────────────────────────────────────────

/// Profile links on the directory page, part-time staff left out.
pub fn faculty_links(html: &str, page_url: &str) -> Vec<ListingLink> {
    let doc = Html::parse_document(html);
    let mut links = Vec::new();

    for anchor in select_all(doc.root_element(), r#"a[href*="/disa/people/"], a[href*="/cs/people/"]"#) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let name = text_of(anchor);
        if name.chars().count() <= 2 {
            continue;
        }

        let row = anchor
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|a| is_named(*a, &["tr", "div", "li"]));
        if row.is_some_and(|r| is_part_time(&text_of(r))) {
            continue;
        }

        let base = if page_url.is_empty() { BASE_URL } else { page_url };
        if let Some(url) = absolute_url(base, href) {
            links.push(ListingLink::named(url, name));
        }
    }

    links
}

// ── Profile ───────────────────────────────────────────────────────────────────

pub fn extract_faculty(link: &ListingLink, html: &str) -> Extracted<FacultyProfile> {
    let doc = Html::parse_document(html);
    let root = doc.root_element();
    let url = link.url.as_str();
    let slug = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default().to_lowercase();

    let mut prof = FacultyProfile {
        name: link.name.clone().unwrap_or_default(),
        profile_url: url.to_string(),
        ..Default::default()
    };

    let profpic = select_one(root, "div.profpic");
    if let Some(pic) = profpic {
        let lines = appointment_lines(pic);
        if let Some((first, rest)) = lines.split_first() {
            if is_part_time(first) {
                return Extracted::Skipped(format!("part-time appointment: {}", first));
            }
            prof.appointment = Some(first.clone());
            prof.additional_titles = rest.to_vec();
        }
        prof.avatar_url = select_one(pic, "img").and_then(|img| image_src(img, url));
    }
    if prof.name.is_empty() {
        prof.name = profpic
            .and_then(|p| select_one(p, "h4"))
            .or_else(|| select_one(root, "h1"))
            .map(text_of)
            .unwrap_or_default();
    }

    read_contact_block(&doc, &mut prof, &slug);
    read_contact_paragraphs(&doc, &mut prof);

    if prof.avatar_url.is_none() {
        prof.avatar_url = select_all(root, "img[src]")
            .into_iter()
            .find(|img| img.value().attr("src").is_some_and(|s| s.to_lowercase().contains("stfphotos")))
            .and_then(|img| image_src(img, url));
    }

    prof.profile = profile_text(&doc);
    prof.education = select_all(root, "li")
        .into_iter()
        .map(text_of)
        .filter(|t| mentions_degree(t))
        .collect();
    prof.research_areas = research_areas(&doc);
    prof.research_interests = heading(&doc, &["RESEARCH INTERESTS"])
        .and_then(|h| next_in_document(&doc, h, "ul"))
        .map(|ul| list_items(ul, false))
        .unwrap_or_default();
    prof.research_projects = research_projects(&doc);
    prof.phd_alumni = phd_alumni(&doc);
    prof.publications = publications(&doc);
    prof.awards = heading(&doc, &["AWARDS", "HONOURS"])
        .and_then(|h| next_in_document(&doc, h, "ul"))
        .map(|ul| list_items(ul, false))
        .unwrap_or_default();
    prof.courses = heading(&doc, &["COURSES TAUGHT"])
        .map(|h| {
            siblings_until_h3(h)
                .into_iter()
                .filter(|e| e.value().name() == "p")
                .map(text_of)
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if prof.email.is_none() {
        prof.email = infer_email(prof.personal_page.as_deref(), &slug);
    }

    Extracted::Record(prof)
}

fn image_src(img: ElementRef<'_>, page_url: &str) -> Option<String> {
    let src = img.value().attr("src").or_else(|| img.value().attr("data-src"))?;
    absolute_url(page_url, src.trim())
}

/// Lines after the name heading in the photo block, up to the education span.
fn appointment_lines(pic: ElementRef<'_>) -> Vec<String> {
    let Some(h4) = select_one(pic, "h4") else {
        return Vec::new();
    };

    let mut lines = Vec::new();
    for node in h4.next_siblings() {
        let text = match ElementRef::wrap(node) {
            Some(el) if el.value().name() == "span" && has_class(el, "education") => break,
            Some(el) if el.value().name() == "br" => continue,
            Some(el) => text_joined(el, ""),
            None => match node.value() {
                Node::Text(t) => t.trim().to_string(),
                _ => continue,
            },
        };
        if text.chars().count() > 2 && !mentions_degree(&text) {
            lines.push(text);
        }
    }
    lines
}

#[derive(Clone, Copy, PartialEq)]
enum ContactField {
    Office,
    Phone,
    Email,
    Website,
}

fn icon_field(icon_box: ElementRef<'_>) -> Option<ContactField> {
    let icon = select_one(icon_box, "i")?;
    let classes: Vec<&str> = icon.value().classes().collect();
    let any = |needle: &str| classes.iter().any(|c| c.contains(needle));
    if any("map-marker") {
        Some(ContactField::Office)
    } else if any("phone") {
        Some(ContactField::Phone)
    } else if any("envelope") {
        Some(ContactField::Email)
    } else if any("globe") {
        Some(ContactField::Website)
    } else {
        None
    }
}

/// `div.location` alternates icon boxes with the values they label.
fn read_contact_block(doc: &Html, prof: &mut FacultyProfile, slug: &str) {
    let Some(block) = select_one(doc.root_element(), "div.location") else {
        return;
    };

    let mut current: Option<ContactField> = None;
    for node in block.children() {
        let text = match ElementRef::wrap(node) {
            Some(el) if el.value().name() == "div" && has_class(el, "loc_icon") => {
                current = icon_field(el);
                continue;
            }
            Some(el) if el.value().name() == "br" => continue,
            Some(el) if current == Some(ContactField::Website) && el.value().name() == "a" => {
                let href = el.value().attr("href").map(str::trim).unwrap_or_default();
                prof.personal_page = non_empty(href).or_else(|| non_empty(text_of(el)));
                continue;
            }
            // Addresses are rendered as images; infer instead.
            Some(el) if current == Some(ContactField::Email) && el.value().name() == "img" => {
                if let Some(email) = infer_email(prof.personal_page.as_deref(), slug) {
                    prof.email = Some(email);
                }
                continue;
            }
            Some(el) => text_joined(el, ""),
            None => match node.value() {
                Node::Text(t) => t.trim().to_string(),
                _ => continue,
            },
        };
        if text.is_empty() {
            continue;
        }

        match current {
            Some(ContactField::Office) if prof.office.is_none() => prof.office = Some(text),
            Some(ContactField::Phone) if prof.phone.is_none() => prof.phone = Some(collapse_whitespace(&text)),
            Some(ContactField::Email) if prof.email.is_none() => prof.email = Some(text),
            _ => {}
        }
    }
}

/// Older profiles list office, phone and homepage as bare paragraphs.
fn read_contact_paragraphs(doc: &Html, prof: &mut FacultyProfile) {
    for p in select_all(doc.root_element(), "p").into_iter().take(20) {
        let text = text_joined(p, "");
        if text.is_empty() {
            continue;
        }
        if text.contains("COM") && text.contains('-') && prof.office.is_none() {
            prof.office = Some(text);
        } else if ["651", "+65", "6516"].iter().any(|prefix| text.starts_with(prefix)) && prof.phone.is_none() {
            prof.phone = Some(text);
        } else if text.contains("www.comp.nus.edu.sg") && prof.personal_page.is_none() {
            prof.personal_page = Some(text);
        }
    }
}

fn infer_email(personal_page: Option<&str>, slug: &str) -> Option<String> {
    if let Some(page) = personal_page {
        if page.contains('~') {
            let user = page.rsplit('~').next().unwrap_or_default().trim_matches('/');
            if !user.is_empty() {
                return Some(format!("{}@{}", user, EMAIL_DOMAIN));
            }
        }
    }
    if slug.is_empty() { None } else { Some(format!("{}@{}", slug, EMAIL_DOMAIN)) }
}

/// Biography paragraphs between the first `<h4>` and the first `<h3>`.
fn profile_text(doc: &Html) -> Option<String> {
    let h4 = select_one(doc.root_element(), "h4")?;
    let target = h4.id();

    let paragraphs: Vec<String> = doc
        .root_element()
        .descendants()
        .skip_while(|n| n.id() != target)
        .skip(1)
        .filter_map(ElementRef::wrap)
        .take_while(|e| e.value().name() != "h3")
        .filter(|e| e.value().name() == "p")
        .map(text_of)
        .filter(|t| {
            t.chars().count() > MIN_PROFILE_PARAGRAPH_CHARS
                && !t.starts_with("COM")
                && !t.starts_with("651")
                && !t.starts_with("+65")
                && !t.contains("www.comp.nus.edu.sg")
                && !mentions_degree(&truncate_chars(t, 20))
        })
        .take(MAX_PROFILE_PARAGRAPHS)
        .collect();

    non_empty(paragraphs.join(" "))
}

/// First `<h3>` whose upper-cased text contains any of `needles`.
fn heading<'a>(doc: &'a Html, needles: &[&str]) -> Option<ElementRef<'a>> {
    select_all(doc.root_element(), "h3").into_iter().find(|h| {
        let text = text_of(*h).to_uppercase();
        needles.iter().any(|n| text.contains(n))
    })
}

fn siblings_until_h3(h: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    h.next_siblings()
        .filter_map(ElementRef::wrap)
        .take_while(|e| e.value().name() != "h3")
        .collect()
}

fn list_items(ul: ElementRef<'_>, direct_only: bool) -> Vec<String> {
    let items: Vec<ElementRef<'_>> = if direct_only {
        child_elements(ul).filter(|e| e.value().name() == "li").collect()
    } else {
        select_all(ul, "li")
    };
    items.into_iter().map(text_of).filter(|t| !t.is_empty()).collect()
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !value.is_empty() && !list.contains(&value) {
        list.push(value);
    }
}

fn research_areas(doc: &Html) -> Vec<String> {
    let mut areas = Vec::new();
    if let Some(container) = select_one(doc.root_element(), "div#res_area") {
        for a in select_all(container, "a") {
            push_unique(&mut areas, text_of(a));
        }
    } else if let Some(h) = heading(doc, &["RESEARCH AREAS"]) {
        for el in siblings_until_h3(h) {
            if el.value().name() == "h6" {
                push_unique(&mut areas, text_of(el));
            }
        }
    }
    areas
}

fn research_projects(doc: &Html) -> Vec<ResearchProject> {
    let mut projects = Vec::new();

    if let Some(container) = select_one(doc.root_element(), "div#currentprojects") {
        for row in child_elements(container).filter(|e| e.value().name() == "div" && has_class(*e, "row")) {
            let (title, description) = match select_one(row, "p.title_r") {
                Some(title_el) => {
                    let title = select_one(title_el, "b").map(text_of).unwrap_or_else(|| text_of(title_el));
                    let description = title_el
                        .next_siblings()
                        .filter_map(ElementRef::wrap)
                        .find(|e| e.value().name() == "p")
                        .map(text_of)
                        .unwrap_or_default();
                    (title, description)
                }
                None => match select_one(row, "strong") {
                    Some(strong) => {
                        let description = strong
                            .parent()
                            .and_then(ElementRef::wrap)
                            .map(text_of)
                            .unwrap_or_default();
                        (text_of(strong), description)
                    }
                    None => (String::new(), String::new()),
                },
            };
            let tags = select_one(row, "ul.proj_r").map(|ul| list_items(ul, false)).unwrap_or_default();

            if !title.is_empty() {
                projects.push(ResearchProject {
                    title,
                    description: truncate_chars(&description, MAX_DESCRIPTION_CHARS),
                    tags,
                });
            }
            if projects.len() >= MAX_PROJECTS {
                break;
            }
        }
    } else if let Some(h) = heading(doc, &["RESEARCH PROJECTS"]) {
        for p in siblings_until_h3(h).into_iter().filter(|e| e.value().name() == "p") {
            if projects.len() >= MAX_PROJECTS {
                break;
            }
            let Some(strong) = select_one(p, "strong") else {
                continue;
            };
            let title = text_of(strong);
            let description = text_of(p).replacen(&title, "", 1).trim().to_string();
            if !title.is_empty() && !description.is_empty() {
                projects.push(ResearchProject {
                    title,
                    description: truncate_chars(&description, MAX_DESCRIPTION_CHARS),
                    tags: Vec::new(),
                });
            }
        }
    }

    projects
}

const POSITION_TITLES: &[&str] = &["Assistant Professor", "Associate Professor", "Professor", "Lecturer"];
const NOT_A_NAME: &[&str] = &["First Job", "Class of", "Assistant", "Associate", "Professor", "Lecturer", "University"];

fn phd_alumni(doc: &Html) -> Vec<AlumniPlacement> {
    let Some(h) = heading(doc, &["PHD ALUMNI"]) else {
        return Vec::new();
    };
    let Some(container) = h
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "div" && has_class(*e, "row"))
    else {
        return Vec::new();
    };

    let mut alumni: Vec<AlumniPlacement> = Vec::new();
    for card in select_all(container, "div") {
        let text = text_joined(card, "\n");
        if text.chars().count() < 20 {
            continue;
        }
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if !lines.iter().any(|l| l.contains("First Job Placement") || l.contains("Class of")) {
            continue;
        }
        if let Some(entry) = parse_alumni_card(&lines) {
            if !alumni.iter().any(|a| a.name == entry.name) {
                alumni.push(entry);
            }
        }
    }
    alumni
}

fn parse_alumni_card(lines: &[&str]) -> Option<AlumniPlacement> {
    let mut entry = AlumniPlacement::default();

    if let Some(name) = lines.iter().find(|l| !NOT_A_NAME.iter().any(|k| l.contains(k))) {
        entry.name = name.to_string();
    } else if let Some(first) = lines.first() {
        match POSITION_TITLES.iter().find(|t| first.contains(*t)) {
            Some(title) => {
                let (name, rest) = first.split_once(title).unwrap_or((*first, ""));
                entry.name = name.trim().to_string();
                entry.current_position = Some(format!("{}{}", title, rest));
            }
            None => entry.name = first.to_string(),
        }
    }

    for (i, line) in lines.iter().enumerate() {
        if line.contains("First Job Placement") {
            let inline = line.replace("First Job Placement", "").trim().to_string();
            entry.first_placement = non_empty(inline).or_else(|| lines.get(i + 1).map(|l| l.to_string()));
        }
        if line.contains("Class of") {
            entry.graduation_year = YEAR.captures(line).and_then(|c| c[1].parse().ok());
        }
    }

    if entry.current_position.is_none() {
        let position = lines
            .iter()
            .position(|l| ["Professor", "Lecturer", "Researcher", "Scientist"].iter().any(|t| l.contains(t)));
        if let Some(i) = position {
            entry.current_position = Some(lines[i].to_string());
            entry.institution = lines[i + 1..]
                .iter()
                .find(|l| ["University", "Institute", "College", "School"].iter().any(|w| l.contains(w)))
                .map(|l| l.to_string());
        }
    }

    if entry.name.is_empty() { None } else { Some(entry) }
}

fn publications(doc: &Html) -> Vec<Publication> {
    let Some(ul) = heading(doc, &["PUBLICATIONS"]).and_then(|h| next_in_document(doc, h, "ul")) else {
        return Vec::new();
    };

    list_items(ul, true)
        .into_iter()
        .map(|citation| Publication {
            title: QUOTED_TITLE
                .captures(&citation)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| truncate_chars(&citation, MAX_PUB_TITLE_CHARS)),
            year: YEAR.captures(&citation).and_then(|c| c[1].parse().ok()),
            full_citation: truncate_chars(&citation, MAX_CITATION_CHARS),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://www.comp.nus.edu.sg/disa/people/tanhk/";

    fn link() -> ListingLink {
        ListingLink::named(URL, "TAN Hock Keng")
    }

    const PROFILE: &str = r#"<html><body>
        <div class="profpic">
          <img src="/stfphotos/tanhk.jpg">
          <h4>TAN Hock Keng</h4>
          Associate Professor<br>
          Vice Dean, Research<br>
          <span class="education">Ph.D. (MIT)</span>
        </div>
        <div class="location">
          <div class="loc_icon"><i class="fa fa-map-marker"></i></div>COM2-04-12<br>
          <div class="loc_icon"><i class="fa fa-phone"></i></div>6516   1234<br>
          <div class="loc_icon"><i class="fa fa-globe"></i></div><a href="https://www.comp.nus.edu.sg/~tanhk/">homepage</a><br>
          <div class="loc_icon"><i class="fa fa-envelope"></i></div><img src="/email/tanhk.png">
        </div>
        <p>Professor Tan studies information systems economics and digital platforms, with a focus on data markets.</p>
        <ul><li>Ph.D., Massachusetts Institute of Technology</li></ul>
        <div id="res_area"><a>Information Systems</a><a>Economics</a><a>Information Systems</a></div>
        <h3>Research Interests</h3>
        <ul><li>Platform economics</li><li>Data markets</li></ul>
        <div id="currentprojects">
          <div class="row"><p class="title_r"><b>Data Pricing</b></p><p>Pricing data goods.</p><ul class="proj_r"><li>Economics</li></ul></div>
        </div>
        <h3>PhD Alumni Placements</h3>
        <div class="row"><div>Lee Wen Hui
First Job Placement
Assistant Professor, Nanyang Technological University
Class of 2019</div></div>
        <h3>Selected Publications</h3>
        <ul><li>Tan, H. K. (2021). "Pricing Data Goods". Management Science.</li><li>Another paper 2018</li></ul>
        <h3>Awards &amp; Honours</h3>
        <ul><li>Best Paper Award</li></ul>
        <h3>Courses Taught</h3>
        <p>IS5126 Hands-on with Applied Analytics</p>
        </body></html>"#;

    #[test]
    fn extracts_full_profile() {
        let Extracted::Record(p) = extract_faculty(&link(), PROFILE) else {
            panic!("expected a record");
        };
        assert_eq!(p.name, "TAN Hock Keng");
        assert_eq!(p.appointment.as_deref(), Some("Associate Professor"));
        assert_eq!(p.additional_titles, vec!["Vice Dean, Research"]);
        assert_eq!(p.avatar_url.as_deref(), Some("https://www.comp.nus.edu.sg/stfphotos/tanhk.jpg"));
        assert_eq!(p.office.as_deref(), Some("COM2-04-12"));
        assert_eq!(p.phone.as_deref(), Some("6516 1234"));
        assert_eq!(p.personal_page.as_deref(), Some("https://www.comp.nus.edu.sg/~tanhk/"));
        assert_eq!(p.email.as_deref(), Some("tanhk@comp.nus.edu.sg"));
        assert!(p.profile.as_deref().unwrap().starts_with("Professor Tan studies"));
        assert_eq!(p.education, vec!["Ph.D., Massachusetts Institute of Technology"]);
        assert_eq!(p.research_areas, vec!["Information Systems", "Economics"]);
        assert_eq!(p.research_interests, vec!["Platform economics", "Data markets"]);
        assert_eq!(p.research_projects.len(), 1);
        assert_eq!(p.research_projects[0].title, "Data Pricing");
        assert_eq!(p.research_projects[0].tags, vec!["Economics"]);
        assert_eq!(p.phd_alumni.len(), 1);
        assert_eq!(p.phd_alumni[0].name, "Lee Wen Hui");
        assert_eq!(p.phd_alumni[0].graduation_year, Some(2019));
        assert_eq!(
            p.phd_alumni[0].first_placement.as_deref(),
            Some("Assistant Professor, Nanyang Technological University")
        );
        assert_eq!(p.publications.len(), 2);
        assert_eq!(p.publications[0].title, "Pricing Data Goods");
        assert_eq!(p.publications[0].year, Some(2021));
        assert_eq!(p.publications[1].year, Some(2018));
        assert_eq!(p.awards, vec!["Best Paper Award"]);
        assert_eq!(p.courses, vec!["IS5126 Hands-on with Applied Analytics"]);
    }

    #[test]
    fn part_time_appointment_is_skipped() {
        let html = r#"<div class="profpic"><h4>X</h4>Part-Time Lecturer<br></div>"#;
        assert!(matches!(extract_faculty(&link(), html), Extracted::Skipped(_)));
    }

    #[test]
    fn email_falls_back_to_slug() {
        let Extracted::Record(p) = extract_faculty(&link(), "<html><body></body></html>") else {
            panic!("expected a record");
        };
        assert_eq!(p.email.as_deref(), Some("tanhk@comp.nus.edu.sg"));
        assert_eq!(p.appointment, None);
    }

    #[test]
    fn directory_skips_part_time_rows() {
        let html = r#"<table>
            <tr><td><a href="/disa/people/tanhk/">TAN Hock Keng</a></td><td>Associate Professor</td></tr>
            <tr><td><a href="/disa/people/lowj/">LOW Jia</a></td><td>Part-Time Lecturer</td></tr>
            <tr><td><a href="/cs/people/ab/">AB</a></td></tr>
        </table>"#;
        let links = faculty_links(html, "https://www.comp.nus.edu.sg/about/faculty/");
        assert_eq!(
            links,
            vec![ListingLink::named("https://www.comp.nus.edu.sg/disa/people/tanhk/", "TAN Hock Keng")]
        );
    }
}
