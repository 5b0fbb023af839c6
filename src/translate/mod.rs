//! English → Chinese field translation for scraped job files.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ExtractError, FetchError};
use crate::scraper::http_client::HttpClient;

pub const ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";
pub const TARGET_LANG: &str = "zh-CN";
pub const MAX_CHUNK_CHARS: usize = 4000;

pub const DEFAULT_FIELDS: &[(&str, &str)] = &[
    ("description_en", "description_zh"),
    ("requirements_en", "requirements_zh"),
    ("application_steps_en", "application_steps_zh"),
];

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate_chunk(&self, chunk: &str) -> Result<String, FetchError>;
}

/// The keyless `client=gtx` web endpoint.
pub struct GtxTranslator {
    http: HttpClient,
    target: String,
}

impl GtxTranslator {
    pub fn new(http: HttpClient) -> Self {
        Self { http, target: TARGET_LANG.to_string() }
    }

    fn request_url(&self, chunk: &str) -> Result<String, url::ParseError> {
        let mut url = Url::parse(ENDPOINT)?;
        url.query_pairs_mut()
            .append_pair("client", "gtx")
            .append_pair("sl", "auto")
            .append_pair("tl", &self.target)
            .append_pair("dt", "t")
            .append_pair("q", chunk);
        Ok(url.into())
    }
}

#[async_trait]
impl Translator for GtxTranslator {
    async fn translate_chunk(&self, chunk: &str) -> Result<String, FetchError> {
        let malformed = |message: String| FetchError::Malformed { url: ENDPOINT.to_string(), message };
        let url = self.request_url(chunk).map_err(|e| malformed(e.to_string()))?;
        let data = self.http.get_json(&url, HeaderMap::new()).await?;
        parse_gtx_response(&data).map_err(|e| malformed(e.to_string()))
    }
}

/// `[[["译文", "source", ...], ...], ...]` → the translated segments joined.
pub fn parse_gtx_response(data: &Value) -> Result<String, ExtractError> {
    let segments = data
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| ExtractError::StructuredData("translation response has no segment list".into()))?;
    let text: String = segments.iter().filter_map(|s| s.get(0).and_then(Value::as_str)).collect();
    Ok(text.trim().to_string())
}

/// Split on line boundaries so each chunk stays under `max_chars`. Text that
/// already fits is returned whole; a single overlong line is its own chunk.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
        let len = line.chars().count();
        if !current.is_empty() && current_len + len + 1 > max_chars {
            chunks.push(current.join("\n"));
            current.clear();
            current_len = 0;
        }
        current_len += len + usize::from(!current.is_empty());
        current.push(line);
    }
    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }
    chunks
}

/// Translate a long text chunk by chunk. A failed chunk is logged and left
/// out; the rest still make it through.
pub async fn translate_text<T: Translator + ?Sized>(tr: &T, text: &str, max_chars: usize) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    let mut parts = Vec::new();
    for chunk in chunk_text(text, max_chars) {
        match tr.translate_chunk(&chunk).await {
            Ok(t) if !t.is_empty() => parts.push(t),
            Ok(_) => {}
            Err(e) => {
                let head: String = chunk.chars().take(40).collect();
                warn!("Translation failed (chunk starts with {:?}): {}", head, e);
            }
        }
    }
    parts.join("\n").trim().to_string()
}

/// `"src:dst"` → `("src", "dst")`.
pub fn parse_field_mapping(raw: &str) -> Result<(String, String), String> {
    let (src, dst) = raw.split_once(':').ok_or_else(|| format!("expected src:dst, got '{raw}'"))?;
    let (src, dst) = (src.trim(), dst.trim());
    if src.is_empty() || dst.is_empty() {
        return Err(format!("expected src:dst, got '{raw}'"));
    }
    Ok((src.to_string(), dst.to_string()))
}

pub fn default_fields() -> Vec<(String, String)> {
    DEFAULT_FIELDS.iter().map(|(s, d)| (s.to_string(), d.to_string())).collect()
}

#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub fields: Vec<(String, String)>,
    /// Overwrite destination fields that already hold text.
    pub force: bool,
    pub max_chars: usize,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self { fields: default_fields(), force: false, max_chars: MAX_CHUNK_CHARS }
    }
}

/// Fill destination fields in place. Returns the number of fields written.
pub async fn translate_items<T: Translator + ?Sized>(tr: &T, items: &mut [Value], opts: &TranslateOptions) -> usize {
    let total = items.len();
    let mut written = 0;

    for (idx, item) in items.iter_mut().enumerate() {
        for (src, dst) in &opts.fields {
            let Some(source) =
                item.get(src).and_then(Value::as_str).filter(|s| !s.trim().is_empty()).map(str::to_string)
            else {
                continue;
            };
            let has_target = item.get(dst).and_then(Value::as_str).is_some_and(|s| !s.is_empty());
            if has_target && !opts.force {
                debug!("item {}: {} already set", idx + 1, dst);
                continue;
            }
            let translated = translate_text(tr, &source, opts.max_chars).await;
            if !translated.is_empty()
                && let Some(obj) = item.as_object_mut()
            {
                obj.insert(dst.clone(), Value::String(translated));
                written += 1;
            }
        }
        if (idx + 1) % 20 == 0 || idx + 1 == total {
            info!("Processed {}/{} items", idx + 1, total);
        }
    }
    written
}

/// Round-trip typed records through JSON so the same field mapping applies.
pub async fn translate_records<R, T>(tr: &T, records: Vec<R>, opts: &TranslateOptions) -> anyhow::Result<Vec<R>>
where
    R: Serialize + DeserializeOwned,
    T: Translator + ?Sized,
{
    let mut values = records.iter().map(serde_json::to_value).collect::<Result<Vec<_>, _>>()?;
    translate_items(tr, &mut values, opts).await;
    Ok(values.into_iter().map(serde_json::from_value).collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Prefixes every chunk; chunks mentioning FAIL error out.
    struct Echo;

    #[async_trait]
    impl Translator for Echo {
        async fn translate_chunk(&self, chunk: &str) -> Result<String, FetchError> {
            if chunk.contains("FAIL") {
                return Err(FetchError::Status { url: ENDPOINT.into(), status: 429 });
            }
            Ok(format!("译:{chunk}"))
        }
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_text("a\n\nb", 10), vec!["a\n\nb"]);
    }

    #[test]
    fn long_text_splits_on_lines() {
        let text = "aaaa\nbbbb\n\ncccc\ndddddddddddd";
        assert_eq!(chunk_text(text, 10), vec!["aaaa\nbbbb", "cccc", "dddddddddddd"]);
    }

    #[test]
    fn gtx_segments_are_joined() {
        let data = json!([[["你好，", "Hello, ", null], ["世界", "world", null]], null, "en"]);
        assert_eq!(parse_gtx_response(&data).unwrap(), "你好，世界");
        assert!(parse_gtx_response(&json!({"error": 1})).is_err());
    }

    #[test]
    fn request_url_encodes_query() {
        let http = HttpClient::new(&crate::config::ScraperConfig::default()).unwrap();
        let url = GtxTranslator::new(http).request_url("a b&c").unwrap();
        assert!(url.starts_with(ENDPOINT));
        assert!(url.contains("client=gtx"));
        assert!(url.contains("tl=zh-CN"));
        assert!(url.contains("q=a+b%26c"));
    }

    #[test]
    fn field_mapping_parsing() {
        assert_eq!(parse_field_mapping("title_en: title_zh"), Ok(("title_en".into(), "title_zh".into())));
        assert!(parse_field_mapping("title_en").is_err());
        assert!(parse_field_mapping(":x").is_err());
    }

    #[tokio::test]
    async fn failed_chunks_are_dropped() {
        let text = format!("{}\nFAIL here\nend", "x".repeat(8));
        assert_eq!(translate_text(&Echo, &text, 10).await, "译:xxxxxxxx\n译:end");
        assert_eq!(translate_text(&Echo, "   ", 10).await, "");
    }

    #[tokio::test]
    async fn existing_targets_kept_unless_forced() {
        let mut items = vec![
            json!({"description_en": "Build robots", "description_zh": "已有"}),
            json!({"description_en": "", "requirements_en": "MSc"}),
        ];
        let opts = TranslateOptions::default();

        assert_eq!(translate_items(&Echo, &mut items, &opts).await, 1);
        assert_eq!(items[0]["description_zh"], "已有");
        assert_eq!(items[1]["requirements_zh"], "译:MSc");
        assert!(items[1].get("description_zh").is_none());

        let forced = TranslateOptions { force: true, ..TranslateOptions::default() };
        translate_items(&Echo, &mut items, &forced).await;
        assert_eq!(items[0]["description_zh"], "译:Build robots");
    }
}
