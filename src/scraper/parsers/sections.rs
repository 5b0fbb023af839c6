//! Heading-driven text sectioning for vacancy pages.
//!
//! Vacancy bodies are free-form HTML where "Requirements", "How to apply"
//! and friends show up as real headings, as bold runs at the start of a
//! paragraph, or as `<section>` blocks. The walker below reads the markup in
//! document order and files every paragraph and list item under whichever
//! section the most recent heading selected. On rendered pages, text under
//! headings that are site chrome (contact boxes, related vacancies) is
//! dropped; a JSON-LD description keeps all of its text.

use scraper::node::Node;
use scraper::{ElementRef, Html};

use super::{child_elements, is_blank_text, is_named, select_all, select_one, text_of};
use crate::scraper::cleaner::{clean_block, collapse_whitespace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Description,
    Requirements,
    ApplicationSteps,
}

impl Section {
    fn slot(self) -> usize {
        match self {
            Section::Description => 0,
            Section::Requirements => 1,
            Section::ApplicationSteps => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heading {
    Section(Section),
    /// Page furniture; text below it is discarded.
    Ignored,
    Unknown,
}

const IGNORED: &[&str] = &[
    "working at",
    "employer information",
    "interesting for you",
    "recommended jobs",
    "related vacancies",
    "share this job",
    "contact",
];

const REQUIREMENTS: &[&str] = &[
    "requirement",
    "qualification",
    "who are you",
    "profile",
    "your profile",
    "what you bring",
    "skills",
    "competence",
    "functie-eisen",
    "vereisten",
    "wij vragen",
];

const APPLICATION: &[&str] = &[
    "application",
    "apply",
    "procedure",
    "how to apply",
    "selection",
    "sollicitatie",
    "recruitment process",
];

const DESCRIPTION: &[&str] = &[
    "job description",
    "about",
    "position",
    "role",
    "introduction",
    "project",
    "what you will do",
    "functiebeschrijving",
    "we offer",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "ul", "ol", "li", "section", "article", "header", "footer", "main", "aside",
    "h1", "h2", "h3", "h4", "h5", "h6", "table", "thead", "tbody", "tr", "td", "th",
    "blockquote", "dl", "dt", "dd", "figure",
];

const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

/// Map heading text to a section. Ignored keywords win over everything,
/// then requirements, application steps and description in that order.
pub fn classify_heading(text: &str) -> Heading {
    let normalized = text.trim().to_lowercase();
    if normalized.is_empty() {
        return Heading::Unknown;
    }
    let has = |keys: &[&str]| keys.iter().any(|k| normalized.contains(k));

    if has(IGNORED) {
        Heading::Ignored
    } else if has(REQUIREMENTS) {
        Heading::Section(Section::Requirements)
    } else if has(APPLICATION) {
        Heading::Section(Section::ApplicationSteps)
    } else if has(DESCRIPTION) {
        Heading::Section(Section::Description)
    } else {
        Heading::Unknown
    }
}

/// Narrow classifier for JSON-LD description fragments. Only requirement,
/// application/procedure and job description/about headings switch
/// sections; nothing is ever ignored.
pub fn classify_inline_heading(text: &str) -> Heading {
    let normalized = text.trim().to_lowercase();
    if normalized.contains("requirement") {
        Heading::Section(Section::Requirements)
    } else if normalized.contains("application") || normalized.contains("procedure") {
        Heading::Section(Section::ApplicationSteps)
    } else if normalized.contains("job description") || normalized.contains("about") {
        Heading::Section(Section::Description)
    } else {
        Heading::Unknown
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionTexts {
    pub description: String,
    pub requirements: String,
    pub application_steps: String,
}

impl SectionTexts {
    pub fn is_empty(&self) -> bool {
        self.description.is_empty() && self.requirements.is_empty() && self.application_steps.is_empty()
    }

    fn fill_missing_from(mut self, other: SectionTexts) -> Self {
        if self.description.is_empty() {
            self.description = other.description;
        }
        if self.requirements.is_empty() {
            self.requirements = other.requirements;
        }
        if self.application_steps.is_empty() {
            self.application_steps = other.application_steps;
        }
        self
    }
}

// ── Walker ────────────────────────────────────────────────────────────────────

struct Walker {
    classify: fn(&str) -> Heading,
    /// `None` while inside an ignored section.
    current: Option<Section>,
    inline: String,
    parts: [Vec<String>; 3],
}

impl Walker {
    fn starting_at(section: Section, classify: fn(&str) -> Heading) -> Self {
        Self {
            classify,
            current: Some(section),
            inline: String::new(),
            parts: Default::default(),
        }
    }

    fn emit(&mut self, text: String) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if let Some(section) = self.current {
            self.parts[section.slot()].push(text.to_string());
        }
    }

    fn flush(&mut self) {
        let line = collapse_whitespace(&std::mem::take(&mut self.inline));
        self.emit(line);
    }

    fn apply(&mut self, heading: Heading) {
        self.flush();
        self.current = match heading {
            Heading::Section(section) => Some(section),
            Heading::Ignored => None,
            Heading::Unknown => Some(Section::Description),
        };
    }

    fn walk(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            match child.value() {
                Node::Text(t) => self.inline.push_str(t),
                Node::Element(_) => {
                    if let Some(e) = ElementRef::wrap(child) {
                        self.visit(e);
                    }
                }
                _ => {}
            }
        }
    }

    fn visit(&mut self, e: ElementRef<'_>) {
        match e.value().name() {
            "script" | "style" | "noscript" | "template" => {}
            "br" => self.flush(),
            "strong" | "b" if self.inline.trim().is_empty() => {
                self.apply((self.classify)(&text_of(e)));
            }
            "li" => {
                self.flush();
                let text = text_of(e);
                if !text.is_empty() {
                    self.emit(format!("- {}", text));
                }
            }
            "p" => self.paragraph(e),
            _ if is_named(e, HEADING_TAGS) => self.apply((self.classify)(&text_of(e))),
            _ if child_elements(e).any(|c| is_named(c, BLOCK_TAGS)) => {
                self.flush();
                self.walk(e);
                self.flush();
            }
            _ if is_named(e, BLOCK_TAGS) => {
                self.flush();
                self.emit(text_of(e));
            }
            _ => {
                for t in e.text() {
                    self.inline.push_str(t);
                }
            }
        }
    }

    /// A paragraph opening with a bold run can itself be a heading:
    /// `<p><strong>Requirements:</strong> MSc degree</p>`.
    fn paragraph(&mut self, p: ElementRef<'_>) {
        self.flush();

        let lead = p
            .children()
            .find(|n| !is_blank_text(n.value()))
            .and_then(ElementRef::wrap)
            .filter(|e| is_named(*e, &["strong", "b"]));

        if let Some(lead) = lead {
            let head = text_of(lead);
            let rest: String = p
                .children()
                .filter(|n| n.id() != lead.id())
                .map(|n| match ElementRef::wrap(n) {
                    Some(e) => e.text().collect::<String>(),
                    None => match n.value() {
                        Node::Text(t) => String::from(&**t),
                        _ => String::new(),
                    },
                })
                .collect();
            let rest = collapse_whitespace(&rest);
            let rest = rest.trim_start_matches(':').trim();

            let heading = (self.classify)(&head);
            if heading != Heading::Unknown || head.ends_with(':') || rest.is_empty() {
                self.apply(heading);
                self.emit(rest.to_string());
                return;
            }
        }

        self.emit(text_of(p));
    }

    fn finish(mut self) -> SectionTexts {
        self.flush();
        let [description, requirements, application_steps] = self.parts.map(|p| clean_block(&p.join("\n")));
        SectionTexts {
            description,
            requirements,
            application_steps,
        }
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Section an HTML fragment such as a JSON-LD `description`, where headings
/// are usually inline bold runs. Unrecognised headings fall back to the
/// description.
pub fn split_inline_headings(fragment: &str) -> SectionTexts {
    let doc = Html::parse_fragment(fragment);
    let mut walker = Walker::starting_at(Section::Description, classify_inline_heading);
    walker.walk(doc.root_element());
    walker.finish()
}

/// Section a rendered vacancy page.
///
/// Leaf `<section>` blocks with a recognised heading are read first; any
/// section still empty afterwards is taken from a walk over the main
/// description block.
pub fn sections_from_dom(doc: &Html) -> SectionTexts {
    let structured = from_section_blocks(doc);
    let main = from_main_section(doc);
    if structured.is_empty() {
        main
    } else {
        structured.fill_missing_from(main)
    }
}

fn leaf_sections(doc: &Html) -> Vec<ElementRef<'_>> {
    select_all(doc.root_element(), "section")
        .into_iter()
        .filter(|s| {
            !s.descendants()
                .skip(1)
                .filter_map(ElementRef::wrap)
                .any(|e| e.value().name() == "section")
        })
        .collect()
}

fn from_section_blocks(doc: &Html) -> SectionTexts {
    let mut out = SectionTexts::default();

    for block in leaf_sections(doc) {
        let heading = select_one(block, "h1, h2, h3, h4").map(text_of).unwrap_or_default();
        let Heading::Section(section) = classify_heading(&heading) else {
            continue;
        };

        let mut walker = Walker::starting_at(section, classify_heading);
        walker.walk(block);
        let texts = walker.finish();

        for (dst, src) in [
            (&mut out.description, texts.description),
            (&mut out.requirements, texts.requirements),
            (&mut out.application_steps, texts.application_steps),
        ] {
            if src.is_empty() {
                continue;
            }
            if !dst.is_empty() {
                dst.push('\n');
            }
            dst.push_str(&src);
        }
    }

    out
}

fn from_main_section(doc: &Html) -> SectionTexts {
    let sections = select_all(doc.root_element(), "section");
    let main = sections
        .iter()
        .copied()
        .find(|s| {
            select_all(*s, "h2")
                .into_iter()
                .any(|h| text_of(h).to_lowercase().contains("job description"))
        })
        .or_else(|| sections.first().copied());

    let Some(main) = main else {
        return SectionTexts::default();
    };
    let mut walker = Walker::starting_at(Section::Description, classify_heading);
    walker.walk(main);
    walker.finish()
}
