//! Localized message rendering.

mod i18n;
mod template;

pub use i18n::{format_args_positional, I18nError, JsonLocalizer, Localizer};
pub use template::{escape, trim_description, MessageRenderer, RenderContext, RenderError};
