//! Declarative, rule-tagged validation of config values.
//!
//! Rules are written as comma separated tags, optionally with a parameter:
//!
//! ```text
//! omitempty,abspath
//! requiredwith=destination,relativelocal
//! dive,debianpackage
//! variantref|imageref
//! ```
//!
//! Values are checked in their serialized form so the same rules apply to
//! config fields and to policy paths.

use crate::paths;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// The only config version this crate reads.
pub const CURRENT_VERSION: &str = "v4";

static DEBIAN_PACKAGE: Lazy<Regex> = Lazy::new(|| {
    let name = r"[a-z0-9][a-z0-9+.\-]+";
    let version = r"(?:[0-9]+:)?[0-9]+[a-zA-Z0-9\.\+\-~]*";
    let release = r"[a-zA-Z](?:[a-zA-Z0-9\-]*[a-zA-Z0-9]+)?";
    Regex::new(&format!(r"^{}(?:={}|/{})?$", name, version, release))
        .expect("Invalid Debian package regex")
});

static ENV_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]+$").expect("Invalid environment variable regex")
});

static VARIANT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9\-\.]*[a-zA-Z0-9]$").expect("Invalid variant name regex")
});

static PYTHON_VERSION: Lazy<Regex> = Lazy::new(|| {
    let one = r"(?:<|<=|!=|==|>=|>|~=)[a-zA-Z0-9\-_\.\*\+!]+";
    Regex::new(&format!(r"^{}(?:,{})*$", one, one)).expect("Invalid Python version regex")
});

static HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z]([a-zA-Z0-9\-]+[\.]?)*[a-zA-Z0-9]$").expect("Invalid hostname regex")
});

static ALPHANUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9]+$").expect("Invalid alphanumeric regex"));

/// Docker distribution image reference: `[domain/]name[:tag][@digest]`.
static IMAGE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    let alpha_numeric = r"[a-z0-9]+";
    let separator = r"(?:[._]|__|[-]*)";
    let name_component = format!("{a}(?:{s}{a})*", a = alpha_numeric, s = separator);
    let domain_component = r"(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
    let domain = format!(r"{d}(?:\.{d})*(?::[0-9]+)?", d = domain_component);
    let tag = r"[\w][\w.-]{0,127}";
    let digest = r"[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*[:][[:xdigit:]]{32,}";
    let name = format!("(?:{}/)?{n}(?:/{n})*", domain, n = name_component);

    Regex::new(&format!("^{}(?::{})?(?:@{})?$", name, tag, digest))
        .expect("Invalid image reference regex")
});

/// Named shorthands for common rule combinations.
fn alias(tag: &str) -> Option<String> {
    match tag {
        "currentversion" => Some(format!("eq={}", CURRENT_VERSION)),
        "nodeenv" => Some("alphanum".to_string()),
        "username" => Some("hostname,ne=root,min=3".to_string()),
        "baseimage" => Some("imageref".to_string()),
        "artifactfrom" => Some("variantref|imageref".to_string()),
        _ => None,
    }
}

const BUILTIN_TAGS: &[&str] = &[
    "required",
    "requiredwith",
    "notallowedwith",
    "abspath",
    "imageref",
    "debianpackage",
    "envvars",
    "variants",
    "variantref",
    "relativelocal",
    "pypkgver",
    "httpurl",
    "unique",
    "isfalse",
    "istrue",
    "hostname",
    "alphanum",
    "eq",
    "ne",
    "oneof",
    "min",
    "max",
];

/// Message templates keyed by rule tag.
fn template(tag: &str) -> Option<&'static str> {
    Some(match tag {
        "abspath" => r#"{field}: "{value}" is not a valid absolute non-root path"#,
        "artifactfrom" => r#"{field}: "{value}" is not a valid image reference or known variant"#,
        "baseimage" | "imageref" => r#"{field}: "{value}" is not a valid image reference"#,
        "currentversion" => r#"{field}: config version "{value}" is unsupported"#,
        "debianpackage" => r#"{field}: "{value}" is not a valid Debian package name"#,
        "envvars" => "{field}: contains invalid environment variable names",
        "httpurl" => r#"{field}: "{value}" is not a valid HTTP/HTTPS URL"#,
        "nodeenv" => r#"{field}: "{value}" is not a valid Node environment name"#,
        "pypkgver" => r#"{field}: "{value}" is not a valid Python package version specification"#,
        "relativelocal" => r#"{field}: path must be relative when "from" is "local""#,
        "required" => "{field}: is required",
        "requiredwith" => r#"{field}: is required if "{param}" is also set"#,
        "unique" => "{field}: cannot contain duplicates",
        "username" => r#"{field}: "{value}" is not a valid user name"#,
        "variantref" => r#"{field}: references an unknown variant "{value}""#,
        "variants" => "{field}: contains a bad variant name",
        "notallowedwith" => {
            r#"{field}: is not allowed if any of field(s) "{param}" is declared/included"#
        }
        _ => return None,
    })
}

/// A rule string that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown validation rule \"{tag}\"")]
pub struct RuleError {
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Check {
    tag: String,
    param: String,
    alias: Option<Box<Rules>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    OmitEmpty,
    Dive,
    /// Passes if any alternative passes.
    AnyOf(Vec<Check>),
}

/// A parsed rule string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rules(Vec<Term>);

/// The first rule a value failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub tag: String,
    pub param: String,
    pub value: String,
    /// Element suffix such as `[2]` when the failure is inside a `dive`
    pub suffix: String,
}

/// What rules may look at beyond the value itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleContext<'a> {
    /// Names of the declared variants
    pub variants: Option<&'a BTreeSet<String>>,
    /// The serialized struct containing the value
    pub siblings: Option<&'a Value>,
}

impl<'a> RuleContext<'a> {
    fn sibling(&self, name: &str) -> Option<&'a Value> {
        self.siblings.and_then(|s| s.get(name))
    }
}

impl Rules {
    /// Parses a rule string, expanding aliases.
    ///
    /// # Arguments
    /// * `rules` - Comma separated rule tags
    ///
    /// # Returns
    /// * `Err(RuleError)` if a tag is not known
    pub fn parse(rules: &str) -> Result<Self, RuleError> {
        let mut terms = Vec::new();

        for part in rules.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let term = match part {
                "omitempty" => Term::OmitEmpty,
                "dive" => Term::Dive,
                _ => Term::AnyOf(part.split('|').map(Self::parse_check).collect::<Result<_, _>>()?),
            };
            terms.push(term);
        }

        Ok(Self(terms))
    }

    fn parse_check(tag: &str) -> Result<Check, RuleError> {
        let (tag, param) = tag.split_once('=').unwrap_or((tag, ""));

        if let Some(expanded) = alias(tag) {
            return Ok(Check {
                tag: tag.to_string(),
                param: param.to_string(),
                alias: Some(Box::new(Self::parse(&expanded)?)),
            });
        }

        if !BUILTIN_TAGS.contains(&tag) {
            return Err(RuleError { tag: tag.to_string() });
        }

        Ok(Check { tag: tag.to_string(), param: param.to_string(), alias: None })
    }

    /// Checks `value`, returning the first failed rule.
    pub fn check(&self, value: &Value, ctx: &RuleContext<'_>) -> Option<RuleFailure> {
        check_terms(&self.0, value, ctx, "")
    }
}

fn check_terms(
    terms: &[Term],
    value: &Value,
    ctx: &RuleContext<'_>,
    suffix: &str,
) -> Option<RuleFailure> {
    for (i, term) in terms.iter().enumerate() {
        match term {
            Term::OmitEmpty => {
                if is_zero(value) {
                    return None;
                }
            }
            Term::Dive => {
                let rest = &terms[i + 1..];
                let elements: Vec<(String, &Value)> = match value {
                    Value::Array(items) => {
                        items.iter().enumerate().map(|(i, v)| (format!("[{}]", i), v)).collect()
                    }
                    Value::Object(map) => {
                        map.iter().map(|(k, v)| (format!("[{}]", k), v)).collect()
                    }
                    _ => Vec::new(),
                };

                return elements.into_iter().find_map(|(index, element)| {
                    check_terms(rest, element, ctx, &format!("{}{}", suffix, index))
                });
            }
            Term::AnyOf(checks) => {
                if !checks.iter().any(|c| c.passes(value, ctx)) {
                    let tag = checks.iter().map(|c| c.tag.as_str()).collect::<Vec<_>>().join("|");

                    return Some(RuleFailure {
                        tag,
                        param: checks[0].param.clone(),
                        value: display(value),
                        suffix: suffix.to_string(),
                    });
                }
            }
        }
    }

    None
}

impl Check {
    fn passes(&self, value: &Value, ctx: &RuleContext<'_>) -> bool {
        if let Some(rules) = &self.alias {
            return rules.check(value, ctx).is_none();
        }

        let param = self.param.as_str();
        let text = value.as_str().unwrap_or_default();

        match self.tag.as_str() {
            "required" => !is_zero(value),
            "requiredwith" => match ctx.sibling(param) {
                Some(other) => is_zero(other) || !is_zero(value),
                None => false,
            },
            "notallowedwith" => {
                is_zero(value)
                    || param.split_whitespace().all(|peer| ctx.sibling(peer).map_or(true, is_zero))
            }
            "abspath" => paths::is_abs(text) && paths::clean(text) != "/",
            "imageref" => IMAGE_REFERENCE.is_match(text),
            "debianpackage" => DEBIAN_PACKAGE.is_match(text),
            "envvars" => keys_match(value, &ENV_VAR),
            "variants" => keys_match(value, &VARIANT_NAME),
            "variantref" => {
                text == super::artifacts::LOCAL_ARTIFACT_KEYWORD
                    || ctx.variants.is_some_and(|variants| variants.contains(text))
            }
            "relativelocal" => {
                let from = ctx.sibling("from").and_then(Value::as_str).unwrap_or_default();

                text.is_empty()
                    || from != super::artifacts::LOCAL_ARTIFACT_KEYWORD
                    || !(paths::is_abs(text) || paths::clean(text).starts_with(".."))
            }
            "pypkgver" => PYTHON_VERSION.is_match(text),
            "httpurl" => reqwest::Url::parse(text)
                .map(|url| url.scheme() == "http" || url.scheme() == "https")
                .unwrap_or(false),
            "unique" => is_unique(value),
            "isfalse" => value.as_bool() == Some(false),
            "istrue" => value.as_bool() == Some(true),
            "hostname" => HOSTNAME.is_match(text),
            "alphanum" => ALPHANUM.is_match(text),
            "eq" => equals(value, param),
            "ne" => !equals(value, param),
            "oneof" => param.split_whitespace().any(|p| equals(value, p)),
            "min" => param.parse::<f64>().is_ok_and(|min| magnitude(value) >= min),
            "max" => param.parse::<f64>().is_ok_and(|max| magnitude(value) <= max),
            _ => false,
        }
    }
}

/// Whether a serialized value is its type's zero value.
fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.values().all(is_zero),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn keys_match(value: &Value, re: &Regex) -> bool {
    value.as_object().map_or(true, |map| map.keys().all(|k| re.is_match(k)))
}

fn is_unique(value: &Value) -> bool {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        _ => return true,
    };

    items.iter().enumerate().all(|(i, a)| items[i + 1..].iter().all(|b| a != b))
}

/// Strings compare by text, numbers and bools by value, collections by length.
fn equals(value: &Value, param: &str) -> bool {
    match value {
        Value::String(s) => s == param,
        Value::Number(n) => param.parse::<f64>().ok() == n.as_f64(),
        Value::Bool(b) => param.parse::<bool>().ok() == Some(*b),
        Value::Array(items) => param.parse::<usize>().ok() == Some(items.len()),
        Value::Object(map) => param.parse::<usize>().ok() == Some(map.len()),
        Value::Null => param.is_empty(),
    }
}

/// String length, number value or collection size, for `min` and `max`.
fn magnitude(value: &Value) -> f64 {
    match value {
        Value::String(s) => s.chars().count() as f64,
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        Value::Array(items) => items.len() as f64,
        Value::Object(map) => map.len() as f64,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Null => 0.0,
    }
}

/// A single failed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path to the field, e.g. `variants.build.lives.in`
    pub namespace: String,
    pub field: String,
    pub tag: String,
    pub param: String,
    pub value: String,
}

impl FieldError {
    /// Renders the error as a message a user can act on.
    pub fn humanize(&self) -> String {
        match template(&self.tag) {
            Some(tmpl) => tmpl
                .replace("{field}", &self.field)
                .replace("{value}", &self.value)
                .replace("{param}", &self.param),
            None => format!("{}: failed on the \"{}\" rule", self.field, self.tag),
        }
    }
}

/// All field errors found in one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// True when the config declares an unsupported version.
    pub fn is_version_mismatch(&self) -> bool {
        self.0.iter().any(|e| e.tag == "currentversion")
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(FieldError::humanize).collect();
        f.write_str(&messages.join("\n"))
    }
}

impl std::error::Error for ValidationErrors {}

/// Types that declare validation rules for their fields.
pub trait Validate {
    fn validate(&self, v: &mut Validator<'_>);
}

/// Walks a config tree collecting [`FieldError`]s.
pub struct Validator<'a> {
    variants: &'a BTreeSet<String>,
    path: Vec<String>,
    siblings: Option<Value>,
    errors: Vec<FieldError>,
}

impl<'a> Validator<'a> {
    /// # Arguments
    /// * `variants` - Declared variant names, for `variantref`
    pub fn new(variants: &'a BTreeSet<String>) -> Self {
        Self { variants, path: Vec::new(), siblings: None, errors: Vec::new() }
    }

    /// Checks one field against a rule string.
    pub fn field<T: Serialize + ?Sized>(&mut self, name: &str, value: &T, rules: &str) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);

        let failure = match Rules::parse(rules) {
            Ok(rules) => {
                let ctx =
                    RuleContext { variants: Some(self.variants), siblings: self.siblings.as_ref() };
                rules.check(&value, &ctx)
            }
            Err(e) => Some(RuleFailure {
                tag: e.tag,
                param: String::new(),
                value: display(&value),
                suffix: String::new(),
            }),
        };

        if let Some(failure) = failure {
            let field = format!("{}{}", name, failure.suffix);
            let namespace = self
                .path
                .iter()
                .map(String::as_str)
                .chain([field.as_str()])
                .collect::<Vec<_>>()
                .join(".");

            self.errors.push(FieldError {
                namespace,
                field,
                tag: failure.tag,
                param: failure.param,
                value: failure.value,
            });
        }
    }

    /// Runs `f` with `name` appended to the current path.
    pub fn nested(&mut self, name: &str, f: impl FnOnce(&mut Self)) {
        self.path.push(name.to_string());
        f(self);
        self.path.pop();
    }

    /// Runs `f` with `parent` visible to rules that look at sibling fields.
    pub fn with_siblings<T: Serialize + ?Sized>(&mut self, parent: &T, f: impl FnOnce(&mut Self)) {
        let previous = self.siblings.replace(serde_json::to_value(parent).unwrap_or(Value::Null));
        f(self);
        self.siblings = previous;
    }

    /// Validates every element of a list under `name[i]`.
    pub fn each<T: Validate>(&mut self, name: &str, items: &[T]) {
        for (i, item) in items.iter().enumerate() {
            self.nested(&format!("{}[{}]", name, i), |v| item.validate(v));
        }
    }

    pub fn finish(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(self.errors))
        }
    }
}

/// Validates `value`, resolving `variantref` against `variants`.
pub fn validate<T: Validate>(
    value: &T,
    variants: &BTreeSet<String>,
) -> Result<(), ValidationErrors> {
    let mut v = Validator::new(variants);
    value.validate(&mut v);
    v.finish()
}
