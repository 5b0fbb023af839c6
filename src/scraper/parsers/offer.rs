//! Compass offer-case pages.
//!
//! The case pages are rendered client-side with no stable class names, so
//! each field is found by its Chinese label: first by regex over the raw
//! markup of the "录取详情" block, then by walking from the label's text node
//! in the DOM.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html};
use tracing::debug;

use super::{following_element, is_named, next_element_sibling, text_joined, text_tight};
use crate::models::OfferRecord;
use crate::scraper::cleaner::{
    MAX_BLOCK_CHARS, MAX_LABEL_VALUE_CHARS, clean_value, non_empty, squeeze_blank_lines, strip_markdown, strip_tags,
};

pub const STUDENT_NAME: &str = "学生姓名";
pub const ADMISSION_SCHOOL: &str = "录取学校";
pub const ADMISSION_MAJOR: &str = "录取专业";
pub const GRADUATION_SCHOOL: &str = "毕业学校";
pub const UNDERGRADUATE_MAJOR: &str = "本科专业";
pub const BASIC_BACKGROUND: &str = "基本背景";
const EXPERIENCE_LABEL: &str = "主要经历";

const DETAIL_HEADING: &str = "录取详情";
const DETAIL_ENDS: &[&str] = &["服务导师", "背景提升", "项目简介"];

/// Site furniture that label regexes tend to run into.
const INVALID_VALUE_KEYWORDS: &[&str] = &["申请手册", "类别分布", "成功案例", "预约咨询", "下载", "关注", "公司地址"];
const DOM_INVALID_KEYWORDS: &[&str] = &["申请手册", "类别分布", "成功案例", "预约咨询"];

const MAX_FIELD_CHARS: usize = 200;
const MIN_EXPERIENCE_CHARS: usize = 10;

static EXPERIENCE_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)主要经历\s*\n\s*(.+?)(?:\n\n+|\n背景提升|\n项目简介|$)").expect("static regex")
});
static EXPERIENCE_IN_HTML: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)主要经历\s*</[^>]+>\s*(.+?)(?:<h[^>]*>背景提升|<h[^>]*>项目简介|背景提升|项目简介)")
        .expect("static regex")
});

pub fn extract_offer(url: &str, html: &str) -> OfferRecord {
    let doc = Html::parse_document(html);
    let scope = detail_section(html);
    let field = |label: &str| extract_field(&doc, scope, label);

    OfferRecord {
        url: url.to_string(),
        student_name: field(STUDENT_NAME),
        admission_school: field(ADMISSION_SCHOOL),
        admission_major: field(ADMISSION_MAJOR),
        graduation_school: field(GRADUATION_SCHOOL),
        undergraduate_major: field(UNDERGRADUATE_MAJOR),
        basic_background: field(BASIC_BACKGROUND),
        main_experiences: main_experiences(&doc, html),
    }
}

/// Raw markup from "录取详情" up to the next unrelated block, or everything.
fn detail_section(html: &str) -> &str {
    let Some(start) = html.find(DETAIL_HEADING) else {
        return html;
    };
    let rest = &html[start..];
    let end = DETAIL_ENDS.iter().filter_map(|m| rest.find(m)).min().unwrap_or(rest.len());
    &rest[..end]
}

fn compile_label_patterns(label: &str) -> Vec<Regex> {
    let l = regex::escape(label);
    [
        format!(r"(?is){l}</[^>]+>\s*<[^>]*>([^<]+)</[^>]+>"),
        format!(
            r"(?is){l}(?:</[^>]+>)?\s*([A-Z]?[^\s<]+?同学|[^<]+?大学|[^<]+?硕士|[^<]+?专业|[^\n<]{{2,30}}?)(?:\s*!\[|<|$|\n|\\n)"
        ),
        format!(r"(?is){l}</[^>]+>\s*([^<\n]{{1,50}}?)(?:\s*!\[|<[^>]*>|$|\n|\\n)"),
    ]
    .iter()
    .filter_map(|p| match Regex::new(p) {
        Ok(re) => Some(re),
        Err(e) => {
            debug!("label pattern for {} rejected: {}", label, e);
            None
        }
    })
    .collect()
}

const FIELD_LABELS: &[&str] =
    &[STUDENT_NAME, ADMISSION_SCHOOL, ADMISSION_MAJOR, GRADUATION_SCHOOL, UNDERGRADUATE_MAJOR, BASIC_BACKGROUND];

static LABEL_PATTERNS: LazyLock<HashMap<&'static str, Vec<Regex>>> =
    LazyLock::new(|| FIELD_LABELS.iter().map(|&l| (l, compile_label_patterns(l))).collect());

fn label_patterns(label: &str) -> &'static [Regex] {
    LABEL_PATTERNS.get(label).map(Vec::as_slice).unwrap_or_default()
}

fn acceptable(value: &str, label: &str, invalid: &[&str]) -> Option<String> {
    if value.is_empty() || value.contains(label) || invalid.iter().any(|k| value.contains(k)) {
        return None;
    }
    clean_value(value, MAX_LABEL_VALUE_CHARS).filter(|v| v.chars().count() <= MAX_FIELD_CHARS)
}

fn extract_field(doc: &Html, scope: &str, label: &str) -> Option<String> {
    for re in label_patterns(label) {
        let Some(caps) = re.captures(scope) else {
            continue;
        };
        let raw = strip_markdown(&strip_tags(caps[1].trim()));
        if let Some(value) = acceptable(raw.trim(), label, INVALID_VALUE_KEYWORDS) {
            return Some(value);
        }
    }

    let parent = label_parent(doc, label)?;

    let full = text_joined(parent, " ");
    if let Some(rest) = full.split_once(label).map(|(_, rest)| rest) {
        if rest.starts_with(char::is_whitespace) {
            let line = rest.trim().lines().next().unwrap_or_default();
            if let Some(value) = acceptable(line, label, DOM_INVALID_KEYWORDS) {
                return Some(value);
            }
        }
    }

    let sibling = next_element_sibling(parent);
    if let Some(value) = sibling.and_then(|s| acceptable(&text_tight(s), label, DOM_INVALID_KEYWORDS)) {
        return Some(value);
    }

    following_element(doc, parent)
        .filter(|next| Some(next.id()) != sibling.map(|s| s.id()))
        .and_then(|next| acceptable(&text_tight(next), label, DOM_INVALID_KEYWORDS))
}

/// Element holding the label's text node; nodes that start with the label
/// are preferred over ones that merely mention it.
fn label_parent<'a>(doc: &'a Html, label: &str) -> Option<ElementRef<'a>> {
    let candidates: Vec<(ElementRef<'a>, bool)> = doc
        .root_element()
        .descendants()
        .filter_map(|n| {
            let Node::Text(t) = n.value() else {
                return None;
            };
            if !t.contains(label) {
                return None;
            }
            let parent = n.parent().and_then(ElementRef::wrap)?;
            if is_named(parent, &["script", "style", "noscript"]) {
                return None;
            }
            Some((parent, t.trim_start().starts_with(label)))
        })
        .collect();

    candidates
        .iter()
        .find(|(_, leading)| *leading)
        .or_else(|| candidates.first())
        .map(|(el, _)| *el)
}

fn visible_text(el: ElementRef<'_>, sep: &str) -> String {
    el.descendants()
        .filter_map(|n| {
            let Node::Text(t) = n.value() else {
                return None;
            };
            let parent = n.parent().and_then(ElementRef::wrap);
            if parent.is_some_and(|p| is_named(p, &["script", "style"])) {
                return None;
            }
            Some(String::from(&**t))
        })
        .collect::<Vec<_>>()
        .join(sep)
}

fn main_experiences(doc: &Html, html: &str) -> Option<String> {
    if let Some(parent) = label_parent(doc, EXPERIENCE_LABEL) {
        if let Some(next) = next_element_sibling(parent) {
            let text = text_joined(next, "\n");
            if text.chars().count() > MIN_EXPERIENCE_CHARS {
                let text = squeeze_blank_lines(&strip_tags(&strip_markdown(&text)));
                if let Some(text) = non_empty(text) {
                    return Some(text);
                }
            }
        }

        let full = visible_text(parent, "\n");
        if let Some(caps) = EXPERIENCE_IN_TEXT.captures(&full) {
            let text = squeeze_blank_lines(caps[1].trim());
            let len = text.chars().count();
            if len > MIN_EXPERIENCE_CHARS && len < MAX_BLOCK_CHARS {
                return Some(text);
            }
        }
    }

    let caps = EXPERIENCE_IN_HTML.captures(html)?;
    let fragment = Html::parse_fragment(&caps[1]);
    let text = squeeze_blank_lines(visible_text(fragment.root_element(), "\n").trim());
    if text.chars().count() > MAX_BLOCK_CHARS {
        return None;
    }
    non_empty(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <nav><a href="/offer">成功案例</a></nav>
        <div class="case"><h2>录取详情</h2>
          <div class="row"><span>学生姓名</span><span>L同学</span></div>
          <div class="row"><span>录取学校</span><span>帝国理工学院</span></div>
          <div class="row"><span>录取专业</span><span>计算机科学硕士</span></div>
          <div class="row"><span>毕业学校</span><span>浙江大学</span></div>
          <div class="row"><span>本科专业</span><span>软件工程</span></div>
          <div class="row"><span>基本背景</span><span>GPA 3.8 / IELTS 7.5</span></div>
          <div class="exp"><h3>主要经历</h3><div><p>阿里巴巴实习 三个月</p><p>国家级大创项目负责人</p></div></div>
        </div>
        <h2>服务导师</h2><div>张老师 申请手册 下载</div>
        </body></html>"#;

    #[test]
    fn label_patterns_compile_once_per_field() {
        for label in FIELD_LABELS {
            assert_eq!(label_patterns(label).len(), 3, "{label}");
        }
        assert!(std::ptr::eq(label_patterns(STUDENT_NAME), label_patterns(STUDENT_NAME)));
        assert!(label_patterns("未知").is_empty());
    }

    #[test]
    fn extracts_labelled_fields() {
        let offer = extract_offer("https://www.compassedu.hk/newst_1", PAGE);
        assert_eq!(offer.student_name.as_deref(), Some("L同学"));
        assert_eq!(offer.admission_school.as_deref(), Some("帝国理工学院"));
        assert_eq!(offer.admission_major.as_deref(), Some("计算机科学硕士"));
        assert_eq!(offer.graduation_school.as_deref(), Some("浙江大学"));
        assert_eq!(offer.undergraduate_major.as_deref(), Some("软件工程"));
        assert_eq!(offer.basic_background.as_deref(), Some("GPA 3.8 / IELTS 7.5"));
        assert_eq!(
            offer.main_experiences.as_deref(),
            Some("阿里巴巴实习 三个月\n国家级大创项目负责人")
        );
    }

    #[test]
    fn rejects_site_furniture_values() {
        let html = r#"<html><body><div><span>录取学校</span><span>申请手册下载</span></div></body></html>"#;
        let offer = extract_offer("https://www.compassedu.hk/newst_2", html);
        assert_eq!(offer.admission_school, None);
        assert_eq!(offer.student_name, None);
        assert_eq!(offer.main_experiences, None);
    }

    #[test]
    fn detail_section_stops_at_next_block() {
        let html = "<p>x</p>录取详情<p>a</p>背景提升<p>b</p>";
        assert_eq!(detail_section(html), "录取详情<p>a</p>");
        assert_eq!(detail_section("<p>none</p>"), "<p>none</p>");
    }

    #[test]
    fn inline_label_value_in_one_node() {
        let html = "<html><body><p>学生姓名 W同学</p></body></html>";
        let offer = extract_offer("https://www.compassedu.hk/newst_3", html);
        assert_eq!(offer.student_name.as_deref(), Some("W同学"));
    }
}
