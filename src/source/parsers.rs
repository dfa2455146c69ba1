use scraper::{ElementRef, Html, Selector};
use tracing::warn;

// ── Price element ─────────────────────────────────────────────────────────────

/// Trimmed text of the first visible element matching `selector`.
///
/// Elements carrying the `hidden` attribute, `aria-hidden="true"` or an inline
/// `display:none` / `visibility:hidden` style (on themselves or an ancestor)
/// are skipped, as are elements with no text.
pub fn visible_text(html: &str, selector: &str) -> Option<String> {
    let sel = match Selector::parse(selector) {
        Ok(sel) => sel,
        Err(e) => {
            warn!("Invalid selector {:?}: {:?}", selector, e);
            return None;
        }
    };

    let doc = Html::parse_document(html);
    doc.select(&sel)
        .filter(|el| is_visible(el))
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|text| !text.is_empty())
}

fn is_visible(el: &ElementRef) -> bool {
    let mut node = Some(*el);
    while let Some(current) = node {
        if is_hidden(&current) {
            return false;
        }
        node = current.parent().and_then(ElementRef::wrap);
    }
    true
}

fn is_hidden(el: &ElementRef) -> bool {
    let v = el.value();
    if v.attr("hidden").is_some() || v.attr("aria-hidden") == Some("true") {
        return true;
    }
    v.attr("style")
        .map(|style| {
            let style: String = style.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_lowercase();
            style.contains("display:none") || style.contains("visibility:hidden")
        })
        .unwrap_or(false)
}
