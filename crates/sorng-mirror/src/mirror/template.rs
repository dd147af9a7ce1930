//! `{{$n}}` / `{{$syncName}}` template expansion.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref TOKEN: Regex =
        Regex::new(r"\{\{\s*\$([A-Za-z0-9_]+)\s*\}\}").expect("valid template token pattern");
}

/// Values a template can refer to.
pub struct TemplateContext<'a> {
    pub captures: Option<&'a Captures<'a>>,
    pub sync_name: &'a str,
}

/// Replace every token in `template`. Unknown names, groups that did not
/// participate and indices past the last group all render as empty text.
pub fn render(template: &str, ctx: &TemplateContext<'_>) -> String {
    TOKEN
        .replace_all(template, |caps: &Captures<'_>| resolve(&caps[1], ctx))
        .into_owned()
}

/// Whether `template` refers to a capture group (`{{$n}}`).
pub fn uses_captures(template: &str) -> bool {
    TOKEN
        .captures_iter(template)
        .any(|caps| caps[1].parse::<usize>().is_ok())
}

fn resolve(name: &str, ctx: &TemplateContext<'_>) -> String {
    if name == "syncName" {
        return ctx.sync_name.to_string();
    }
    name.parse::<usize>()
        .ok()
        .and_then(|i| ctx.captures.and_then(|c| c.get(i)))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}
