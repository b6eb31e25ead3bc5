//! Reading frames, forms and selectors out of the portal's listing pages.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::table::collapse;

/// A parsed `<form>`, ready to be replayed over HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSpec {
    /// Absolute action URL.
    pub action: Url,
    /// Lower-cased method, `get` when unspecified.
    pub method: String,
    /// Successful controls in document order.
    pub fields: Vec<(String, String)>,
    /// Submit buttons as (name, value).
    pub submitters: Vec<(String, String)>,
}

impl FormSpec {
    /// Form data with `overrides` applied and the named submit button
    /// appended, as a browser would send it.
    pub fn encode(&self, overrides: &[(&str, &str)], submitter: Option<&str>) -> Vec<(String, String)> {
        let mut fields = self.fields.clone();
        for (name, value) in overrides {
            match fields.iter().position(|(n, _)| n == name) {
                Some(pos) => {
                    fields[pos].1 = value.to_string();
                    let mut seen = false;
                    fields.retain(|(n, _)| {
                        if n != name {
                            return true;
                        }
                        let keep = !seen;
                        seen = true;
                        keep
                    });
                }
                None => fields.push((name.to_string(), value.to_string())),
            }
        }
        if let Some(button) = submitter {
            if let Some(pair) = self.submitters.iter().find(|(n, _)| n == button) {
                fields.push(pair.clone());
            }
        }
        fields
    }
}

/// Locate the first form containing a control named `control` and resolve
/// its action against `page_url`.
pub fn parse_form(html: &str, page_url: &Url, control: &str) -> Option<FormSpec> {
    let document = Html::parse_document(html);
    let form_sel = Selector::parse("form").ok()?;
    let named_sel = Selector::parse(&crate::portal::by_name("*", control)).ok()?;
    let control_sel = Selector::parse("input, select, textarea").ok()?;

    let form = document
        .select(&form_sel)
        .find(|f| f.select(&named_sel).next().is_some())?;

    let action = match form.value().attr("action").map(str::trim) {
        Some(a) if !a.is_empty() => page_url.join(a).ok()?,
        _ => page_url.clone(),
    };
    let method = form
        .value()
        .attr("method")
        .unwrap_or("get")
        .to_ascii_lowercase();

    let mut fields = Vec::new();
    let mut submitters = Vec::new();
    for el in form.select(&control_sel) {
        let attrs = el.value();
        let Some(name) = attrs.attr("name").filter(|n| !n.is_empty()) else {
            continue;
        };
        if attrs.attr("disabled").is_some() {
            continue;
        }
        match attrs.name() {
            "input" => {
                let kind = attrs.attr("type").unwrap_or("text").to_ascii_lowercase();
                let value = attrs.attr("value").unwrap_or("").to_string();
                match kind.as_str() {
                    "submit" | "image" => submitters.push((name.to_string(), value)),
                    "button" | "reset" | "file" => {}
                    "checkbox" | "radio" => {
                        if attrs.attr("checked").is_some() {
                            let value = if value.is_empty() { "on".to_string() } else { value };
                            fields.push((name.to_string(), value));
                        }
                    }
                    _ => fields.push((name.to_string(), value)),
                }
            }
            "select" => {
                let options = options_of(&el);
                let chosen = options
                    .iter()
                    .find(|o| o.selected)
                    .or_else(|| options.first());
                if let Some(option) = chosen {
                    fields.push((name.to_string(), option.value.clone()));
                }
            }
            "textarea" => fields.push((name.to_string(), el.text().collect())),
            _ => {}
        }
    }

    Some(FormSpec {
        action,
        method,
        fields,
        submitters,
    })
}

/// Options of the `<select>` named `name` as (value, label). `None` when the
/// document has no such selector.
pub fn select_options(html: &str, name: &str) -> Option<Vec<(String, String)>> {
    let document = Html::parse_document(html);
    let sel = Selector::parse(&crate::portal::by_name("select", name)).ok()?;
    let select = document.select(&sel).next()?;
    Some(
        options_of(&select)
            .into_iter()
            .map(|o| (o.value, o.label))
            .collect(),
    )
}

/// `src` of the frame or iframe named `name`.
pub fn frame_src(html: &str, name: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let sel = Selector::parse(&format!(
        "{}, {}",
        crate::portal::by_name("frame", name),
        crate::portal::by_name("iframe", name)
    ))
    .ok()?;
    document
        .select(&sel)
        .find_map(|f| f.value().attr("src"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

struct SelectOption {
    value: String,
    label: String,
    selected: bool,
}

fn options_of(select: &ElementRef<'_>) -> Vec<SelectOption> {
    let Ok(option_sel) = Selector::parse("option") else {
        return Vec::new();
    };
    select
        .select(&option_sel)
        .map(|o| {
            let label = collapse(&o);
            SelectOption {
                value: o
                    .value()
                    .attr("value")
                    .map(|v| v.trim().to_string())
                    .unwrap_or_else(|| label.clone()),
                label,
                selected: o.value().attr("selected").is_some(),
            }
        })
        .collect()
}
