use scraper::Html;
use std::sync::Arc;
use thiserror::Error;

use super::i18n::Localizer;
use crate::config::MessageMode;

const PREVIEW_SEPARATOR: &str = "-----------------------------";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("no translation for key {key} (language {lang})")]
    MissingTranslation { key: String, lang: String },
}

/// Everything one item message is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    pub source_title: String,
    pub content_title: String,
    pub raw_link: String,
    pub preview_text: Option<String>,
    /// Set only when the item has a preview page and the subscription shows it.
    pub telegraph_url: Option<String>,
    pub tags: String,
    pub language: String,
}

/// Renders item messages and notices in the configured markup.
#[derive(Clone)]
pub struct MessageRenderer {
    localizer: Arc<dyn Localizer>,
    mode: MessageMode,
}

impl MessageRenderer {
    pub fn new(localizer: Arc<dyn Localizer>, mode: MessageMode) -> Self {
        Self { localizer, mode }
    }

    pub fn mode(&self) -> MessageMode {
        self.mode
    }

    fn text(&self, lang: &str, key: &str, args: &[&str]) -> Result<String, RenderError> {
        self.localizer
            .try_localize(lang, key, args)
            .ok_or_else(|| RenderError::MissingTranslation {
                key: key.to_string(),
                lang: lang.to_string(),
            })
    }

    /// Renders the message announcing one new item.
    pub fn render(&self, ctx: &RenderContext) -> Result<String, RenderError> {
        let lang = ctx.language.as_str();
        let esc = |s: &str| escape(self.mode, s);
        let mut out = match self.mode {
            MessageMode::Html => format!("<b>{}</b>", esc(&ctx.source_title)),
            MessageMode::Markdown => format!("*{}*", esc(&ctx.source_title)),
        };

        if let Some(preview) = ctx.preview_text.as_deref().filter(|p| !p.is_empty()) {
            out.push('\n');
            out.push_str(&esc(&self.text(lang, "feed_update_preview_header", &[])?));
            out.push('\n');
            out.push_str(&esc(preview));
            out.push('\n');
            out.push_str(PREVIEW_SEPARATOR);
        }

        out.push('\n');
        match &ctx.telegraph_url {
            Some(telegraph_url) => {
                let telegraph = esc(&self.text(lang, "feed_update_telegraph_link_text", &[])?);
                let original = esc(&self.text(lang, "feed_update_original_link_text", &[])?);
                out.push_str(&esc(&ctx.content_title));
                out.push(' ');
                out.push_str(&link(self.mode, telegraph_url, &telegraph));
                out.push_str(" | ");
                out.push_str(&link(self.mode, &ctx.raw_link, &original));
            }
            None => {
                out.push_str(&link(self.mode, &ctx.raw_link, &esc(&ctx.content_title)));
            }
        }

        out.push('\n');
        out.push_str(&esc(&ctx.tags));
        out.push('\n');
        Ok(out)
    }

    /// Renders the one-time notice sent when a source gets disabled.
    pub fn render_source_disabled(
        &self,
        lang: &str,
        source_title: &str,
        source_link: &str,
        threshold: u32,
    ) -> Result<String, RenderError> {
        let threshold = threshold.to_string();
        let title = escape(MessageMode::Markdown, source_title);
        self.text(
            lang,
            "bot_broadcast_source_error_format",
            &[&title, source_link, &threshold],
        )
    }
}

fn link(mode: MessageMode, href: &str, text: &str) -> String {
    match mode {
        MessageMode::Html => format!("<a href=\"{}\">{}</a>", escape(mode, href), text),
        MessageMode::Markdown => format!("[{}]({})", text, href.replace(')', "%29")),
    }
}

/// Escapes text for the given markup.
pub fn escape(mode: MessageMode, s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match (mode, c) {
            (MessageMode::Html, '&') => out.push_str("&amp;"),
            (MessageMode::Html, '<') => out.push_str("&lt;"),
            (MessageMode::Html, '>') => out.push_str("&gt;"),
            (MessageMode::Html, '"') => out.push_str("&quot;"),
            (MessageMode::Markdown, '_' | '*' | '`' | '[') => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Plain-text preview of an item description: markup stripped, whitespace
/// collapsed, cut to `max_chars` with a trailing ellipsis.
///
/// Returns `None` when previews are off (`max_chars == 0`) or nothing is left.
pub fn trim_description(description: &str, max_chars: usize) -> Option<String> {
    if max_chars == 0 {
        return None;
    }
    let fragment = Html::parse_fragment(description);
    let text: String = fragment.root_element().text().collect();
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }

    if collapsed.chars().count() <= max_chars {
        return Some(collapsed);
    }
    let mut cut: String = collapsed.chars().take(max_chars).collect();
    cut.truncate(cut.trim_end().len());
    cut.push_str("...");
    Some(cut)
}
