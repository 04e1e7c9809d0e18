//! Form discovery in HTML responses.
//!
//! Parses a response body with `scraper` and turns every `<form>` into a
//! [`FormCandidate`]: the fields it would submit, its submit buttons and its
//! effective target. Field collection follows what a browser submits, with
//! one exception kept for compatibility with recorded plans: `<input
//! type="submit">` elements are always listed as fields, while `<button>`
//! elements never are.

use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

lazy_static! {
    static ref FORM_SELECTOR: Selector = Selector::parse("form").unwrap();
    static ref CONTROL_SELECTOR: Selector =
        Selector::parse("input, select, textarea, button").unwrap();
    static ref OPTION_SELECTOR: Selector = Selector::parse("option").unwrap();
    static ref BASE_SELECTOR: Selector = Selector::parse("base[href]").unwrap();
}

/// A value the form would submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub value: String,

    /// True when the field comes from a submit-type element
    pub is_submit: bool,
}

/// A submit-type element of a form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitButton {
    pub name: String,
    pub value: String,

    /// Resolved `formaction` override
    pub form_action: Option<Url>,

    /// Normalized `formmethod` override
    pub form_method: Option<String>,
}

/// A `<form>` found in a parsed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormCandidate {
    /// Position of the form among all forms of the document
    pub index: usize,

    /// The form's `name` or `id` attribute, for logging
    pub name: Option<String>,

    /// Form-level method, either "GET" or "POST"
    pub method: String,

    /// Form-level action resolved against the document base URL
    pub action: Url,

    /// Fields in document order
    pub fields: Vec<FormField>,

    pub submit_buttons: Vec<SubmitButton>,
}

impl FormCandidate {
    /// Method and URL the form submits to when `button` is used.
    pub fn submission_target<'a>(
        &'a self,
        button: Option<&'a SubmitButton>,
    ) -> (&'a str, &'a Url) {
        let method = button
            .and_then(|b| b.form_method.as_deref())
            .unwrap_or(self.method.as_str());
        let url = button
            .and_then(|b| b.form_action.as_ref())
            .unwrap_or(&self.action);
        (method, url)
    }

    /// First submit button whose name and value satisfy `is_explicit`.
    pub fn find_submit<F>(&self, mut is_explicit: F) -> Option<&SubmitButton>
    where
        F: FnMut(&str, &str) -> bool,
    {
        self.submit_buttons
            .iter()
            .find(|b| !b.name.is_empty() && is_explicit(&b.name, &b.value))
    }

    /// Every name the form can submit: its fields plus its named submit
    /// buttons, `<button>` elements included.
    pub fn field_names(&self) -> HashSet<&str> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(
                self.submit_buttons
                    .iter()
                    .filter(|b| !b.name.is_empty())
                    .map(|b| b.name.as_str()),
            )
            .collect()
    }

    /// Fields eligible for merging into a request.
    ///
    /// When the form has more than one submit element none of them is
    /// included; the request is expected to name the one it uses.
    pub fn merge_fields(&self) -> impl Iterator<Item = &FormField> {
        let skip_submits = self.submit_buttons.len() > 1;
        self.fields
            .iter()
            .filter(move |f| !(skip_submits && f.is_submit))
    }
}

/// A parsed HTML response.
pub struct HtmlDocument {
    html: Html,
    base_url: Url,
}

impl HtmlDocument {
    /// Parse `body`, resolving relative URLs against `document_url` or the
    /// first `<base href>` of the document.
    pub fn parse(body: &str, document_url: &Url) -> Self {
        let html = Html::parse_document(body);

        let base_url = html
            .select(&BASE_SELECTOR)
            .next()
            .and_then(|base| base.value().attr("href"))
            .and_then(|href| document_url.join(href.trim()).ok())
            .unwrap_or_else(|| document_url.clone());

        Self { html, base_url }
    }

    /// All forms of the document, in document order.
    pub fn forms(&self) -> Vec<FormCandidate> {
        let form_elements: Vec<ElementRef> = self.html.select(&FORM_SELECTOR).collect();
        let mut candidates: Vec<Option<FormCandidate>> = form_elements
            .iter()
            .enumerate()
            .map(|(index, form)| self.candidate(index, form))
            .collect();

        for control in self.html.select(&CONTROL_SELECTOR) {
            let Some(owner) = owner_form(&control, &form_elements) else {
                continue;
            };
            if let Some(Some(candidate)) = candidates.get_mut(owner) {
                self.collect_control(&control, candidate);
            }
        }

        candidates.into_iter().flatten().collect()
    }

    /// Whether the form with `index`, or any element inside it, matches `selector`.
    pub fn form_matches_selector(&self, index: usize, selector: &Selector) -> bool {
        match self.html.select(&FORM_SELECTOR).nth(index) {
            Some(form) => selector.matches(&form) || form.select(selector).next().is_some(),
            None => false,
        }
    }

    fn candidate(&self, index: usize, form: &ElementRef) -> Option<FormCandidate> {
        let attrs = form.value();
        let action = match attrs.attr("action").map(str::trim) {
            None | Some("") => self.base_url.clone(),
            Some(action) => match self.base_url.join(action) {
                Ok(url) => url,
                Err(e) => {
                    debug!(form_index = index, action = %action, error = %e, "Ignoring form with unresolvable action");
                    return None;
                }
            },
        };

        Some(FormCandidate {
            index,
            name: attrs
                .attr("name")
                .or_else(|| attrs.attr("id"))
                .map(str::to_string),
            method: normalize_method(attrs.attr("method")),
            action: without_fragment(action),
            fields: Vec::new(),
            submit_buttons: Vec::new(),
        })
    }

    fn collect_control(&self, control: &ElementRef, candidate: &mut FormCandidate) {
        let el = control.value();
        if el.attr("disabled").is_some() {
            return;
        }
        let name = el.attr("name").unwrap_or("").to_string();
        let kind = el.attr("type").unwrap_or("").to_ascii_lowercase();

        match el.name() {
            "button" => {
                if kind.is_empty() || kind == "submit" {
                    candidate.submit_buttons.push(self.submit_button(control, name));
                }
            }
            "select" => {
                if name.is_empty() {
                    return;
                }
                for value in selected_options(control) {
                    candidate.fields.push(FormField {
                        name: name.clone(),
                        value,
                        is_submit: false,
                    });
                }
            }
            "textarea" => {
                if !name.is_empty() {
                    candidate.fields.push(FormField {
                        name,
                        value: control.text().collect(),
                        is_submit: false,
                    });
                }
            }
            _ => match kind.as_str() {
                "button" | "image" | "reset" => {}
                "submit" => {
                    let button = self.submit_button(control, name);
                    if !button.name.is_empty() {
                        candidate.fields.push(FormField {
                            name: button.name.clone(),
                            value: button.value.clone(),
                            is_submit: true,
                        });
                    }
                    candidate.submit_buttons.push(button);
                }
                "checkbox" | "radio" => {
                    if !name.is_empty() && el.attr("checked").is_some() {
                        let value = match el.attr("value") {
                            Some(v) if !v.is_empty() => v.to_string(),
                            _ => "on".to_string(),
                        };
                        candidate.fields.push(FormField {
                            name,
                            value,
                            is_submit: false,
                        });
                    }
                }
                _ => {
                    if !name.is_empty() {
                        candidate.fields.push(FormField {
                            name,
                            value: el.attr("value").unwrap_or("").to_string(),
                            is_submit: false,
                        });
                    }
                }
            },
        }
    }

    fn submit_button(&self, control: &ElementRef, name: String) -> SubmitButton {
        let el = control.value();
        let value = match el.name() {
            "button" => el
                .attr("value")
                .map(str::to_string)
                .unwrap_or_else(|| control.text().collect::<String>().trim().to_string()),
            _ => el.attr("value").unwrap_or("").to_string(),
        };
        let form_action = el
            .attr("formaction")
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .and_then(|a| self.base_url.join(a).ok())
            .map(without_fragment);

        SubmitButton {
            name,
            value,
            form_action,
            form_method: el.attr("formmethod").map(|m| normalize_method(Some(m))),
        }
    }
}

/// Index of the form a control belongs to.
///
/// A `form` attribute names the owner by id and takes precedence over
/// nesting. Otherwise the nearest enclosing form owns the control.
fn owner_form(control: &ElementRef, forms: &[ElementRef]) -> Option<usize> {
    if let Some(form_id) = control.value().attr("form") {
        return forms
            .iter()
            .position(|f| f.value().attr("id") == Some(form_id));
    }

    control
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "form")
        .and_then(|form| forms.iter().position(|f| *f == form))
}

fn selected_options(select: &ElementRef) -> Vec<String> {
    let options: Vec<ElementRef> = select.select(&OPTION_SELECTOR).collect();
    let selected: Vec<String> = options
        .iter()
        .filter(|o| o.value().attr("selected").is_some())
        .map(option_value)
        .collect();

    if !selected.is_empty() {
        return selected;
    }
    options.first().map(option_value).into_iter().collect()
}

fn option_value(option: &ElementRef) -> String {
    match option.value().attr("value") {
        Some(v) => v.to_string(),
        None => option.text().collect::<String>().trim().to_string(),
    }
}

fn normalize_method(method: Option<&str>) -> String {
    match method {
        Some(m) if m.trim().eq_ignore_ascii_case("post") => "POST".to_string(),
        _ => "GET".to_string(),
    }
}

fn without_fragment(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}
