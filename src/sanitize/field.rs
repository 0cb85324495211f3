//! Field kinds and the per-kind cleaning rules.

// std
use std::{collections::BTreeSet, sync::LazyLock};
// crates.io
use regex::Regex;
// self
use crate::_prelude::*;

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>")
		.expect("Script/style pattern is valid.")
});
static UNCLOSED_SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?is)<(?:script|style)\b.*$").expect("Unclosed script/style pattern is valid.")
});
// A tag needs a name (or `!`/`?` markup) and a closing `>`; a lone `<` is plain text.
static TAG: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"</?[A-Za-z][A-Za-z0-9:-]*(?:\s[^<>]*)?/?>|<![^<>]*>|<\?[^<>]*\?>")
		.expect("Tag pattern is valid.")
});
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"&(?:#[0-9]+|#[xX][0-9A-Fa-f]+|[A-Za-z][A-Za-z0-9]*);")
		.expect("Entity pattern is valid.")
});
static SCRIPT_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?i)(?:java|vb)script\s*:").expect("Script scheme pattern is valid.")
});
static WHITESPACE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"\s+").expect("Whitespace pattern is valid."));

/// How a string field is cleaned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
	/// Trimmed, lowercased, and checked for a plausible address.
	Email,
	/// Reduced to an optional leading `+` and 7–15 digits.
	Phone,
	/// Parsed and restricted to the allowed schemes.
	Url,
	/// Markup, entities, and script schemes removed; whitespace collapsed.
	Text,
	/// Passed through untouched (secrets, pre-rendered content).
	Raw,
}
impl FieldKind {
	/// Infers a kind from a field name.
	///
	/// Credential-like names (`password`, `secret`, `token`, API keys) are never rewritten.
	pub fn infer(name: &str) -> Self {
		let name = name.to_ascii_lowercase();

		if ["password", "passwd", "passphrase", "secret", "token", "apikey", "api_key"]
			.iter()
			.any(|marker| name.contains(marker))
		{
			Self::Raw
		} else if name.contains("email") {
			Self::Email
		} else if name.contains("phone")
			|| name.contains("mobile")
			|| name == "tel"
			|| name.ends_with("_tel")
		{
			Self::Phone
		} else if name.contains("url")
			|| name.contains("website")
			|| name.contains("href")
			|| name.contains("avatar")
			|| name == "link"
			|| name.ends_with("_link")
		{
			Self::Url
		} else {
			Self::Text
		}
	}

	/// Cleans `raw`, returning the reason on rejection.
	pub fn clean(self, raw: &str, url_schemes: &BTreeSet<String>) -> Result<String, &'static str> {
		match self {
			Self::Email => clean_email(raw),
			Self::Phone => clean_phone(raw),
			Self::Url => clean_url(raw, url_schemes),
			Self::Text => Ok(strip_markup(raw)),
			Self::Raw => Ok(raw.to_owned()),
		}
	}
}

/// Explicit kinds and required fields.
///
/// Keys are either full JSON paths (`contact.email`, `items.url` for every array element) or
/// bare field names (`email`); paths take precedence.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRules {
	/// Kind overrides.
	pub kinds: BTreeMap<String, FieldKind>,
	/// Fields whose invalid or empty values reject the request.
	pub required: BTreeSet<String>,
}
impl FieldRules {
	/// Sets the kind for a path or field name.
	pub fn kind(mut self, key: impl Into<String>, kind: FieldKind) -> Self {
		self.kinds.insert(key.into(), kind);

		self
	}

	/// Marks a path or field name as required.
	pub fn require(mut self, key: impl Into<String>) -> Self {
		self.required.insert(key.into());

		self
	}

	/// Resolves the kind of the field at `path` named `name`.
	pub fn kind_for(&self, path: &str, name: Option<&str>) -> FieldKind {
		let generic = strip_indices(path);

		self.kinds
			.get(path)
			.or_else(|| self.kinds.get(&generic))
			.or_else(|| name.and_then(|name| self.kinds.get(name)))
			.copied()
			.unwrap_or_else(|| name.map_or(FieldKind::Text, FieldKind::infer))
	}

	/// Returns `true` when the field at `path` named `name` is required.
	pub fn is_required(&self, path: &str, name: Option<&str>) -> bool {
		self.required.contains(path)
			|| self.required.contains(&strip_indices(path))
			|| name.is_some_and(|name| self.required.contains(name))
	}
}

/// Removes `script`/`style` elements with their content, remaining tags, HTML entities, and
/// script URL schemes, then collapses whitespace.
pub fn strip_markup(raw: &str) -> String {
	let text = SCRIPT_OR_STYLE.replace_all(raw, " ");
	let text = UNCLOSED_SCRIPT_OR_STYLE.replace_all(&text, " ");
	let text = TAG.replace_all(&text, " ");
	let mut text = ENTITY.replace_all(&text, "").into_owned();

	// Removal can splice a new scheme together (`javajavascript:script:`).
	while SCRIPT_SCHEME.is_match(&text) {
		text = SCRIPT_SCHEME.replace_all(&text, "").into_owned();
	}

	WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

fn clean_email(raw: &str) -> Result<String, &'static str> {
	let email = raw.trim().to_lowercase();
	let Some((local, domain)) = email.split_once('@') else {
		return Err("Invalid email address.");
	};
	let plausible = !local.is_empty()
		&& !domain.contains('@')
		&& domain.contains('.')
		&& domain.split('.').all(|label| !label.is_empty())
		&& !email.chars().any(|c| c.is_whitespace() || c.is_control() || "<>\"'".contains(c));

	if plausible { Ok(email) } else { Err("Invalid email address.") }
}

fn clean_phone(raw: &str) -> Result<String, &'static str> {
	let trimmed = raw.trim();
	let digits = trimmed.chars().filter(char::is_ascii_digit).collect::<String>();

	if !(7..=15).contains(&digits.len()) {
		return Err("Invalid phone number.");
	}
	if trimmed.starts_with('+') { Ok(format!("+{digits}")) } else { Ok(digits) }
}

fn clean_url(raw: &str, url_schemes: &BTreeSet<String>) -> Result<String, &'static str> {
	let trimmed = raw.trim();
	let url = Url::parse(trimmed).map_err(|_| "Invalid URL.")?;

	if !url_schemes.contains(url.scheme()) {
		return Err("URL scheme is not allowed.");
	}
	if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
		return Err("Invalid URL.");
	}

	Ok(trimmed.to_owned())
}

fn strip_indices(path: &str) -> String {
	let mut out = String::with_capacity(path.len());
	let mut in_index = false;

	for c in path.chars() {
		match c {
			'[' => in_index = true,
			']' => in_index = false,
			_ if !in_index => out.push(c),
			_ => {},
		}
	}

	out
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn schemes() -> BTreeSet<String> {
		["http", "https", "mailto"].into_iter().map(String::from).collect()
	}

	#[test]
	fn script_elements_are_removed_with_their_content() {
		assert_eq!(strip_markup("<script>alert(1)</script>Hello"), "Hello");
		assert_eq!(strip_markup("Hi <SCRIPT type='x'>steal()</SCRIPT > there"), "Hi there");
		assert_eq!(strip_markup("a<style>p{}</style>b"), "a b");
		assert_eq!(strip_markup("safe<script>never closed"), "safe");
	}

	#[test]
	fn tags_entities_and_script_schemes_are_stripped() {
		assert_eq!(strip_markup("<b>Bold</b> &amp; <i>plain</i>"), "Bold plain");
		assert_eq!(strip_markup("<img src=x onerror=alert(1)>caption"), "caption");
		assert_eq!(strip_markup("go to JavaScript:alert(1)"), "go to alert(1)");
		assert_eq!(strip_markup("javajavascript:script:x"), "x");
		assert_eq!(strip_markup("  many \n\t spaces  "), "many spaces");
		assert_eq!(strip_markup("3 < 5 and 7 > 2"), "3 < 5 and 7 > 2");
		assert_eq!(strip_markup("a<!-- note -->b<?xml version=\"1.0\"?>c"), "a b c");
		assert_eq!(strip_markup("line<br/>break"), "line break");
	}

	#[test]
	fn unclosed_angle_brackets_keep_the_rest_of_the_text() {
		assert_eq!(strip_markup("price<low season"), "price<low season");
		assert_eq!(strip_markup("a<b and c"), "a<b and c");
		assert_eq!(strip_markup("x <= y"), "x <= y");
	}

	#[test]
	fn credential_like_fields_are_passed_through() {
		let rules = FieldRules::default();

		for name in ["password", "newPassword", "client_secret", "refreshToken", "apiKey"] {
			assert_eq!(rules.kind_for(name, Some(name)), FieldKind::Raw, "{name} should be raw");
		}

		assert_eq!(
			rules.kind_for("password", Some("password")).clean("p&amp;ss<x", &schemes()),
			Ok("p&amp;ss<x".into())
		);
	}

	#[test]
	fn emails_are_normalized_and_validated() {
		assert_eq!(FieldKind::Email.clean("  Guest@Example.COM ", &schemes()), Ok("guest@example.com".into()));
		assert!(FieldKind::Email.clean("not-an-email", &schemes()).is_err());
		assert!(FieldKind::Email.clean("a@b", &schemes()).is_err());
		assert!(FieldKind::Email.clean("<a>@b.com", &schemes()).is_err());
	}

	#[test]
	fn phones_keep_plus_and_digits() {
		assert_eq!(FieldKind::Phone.clean("+1 (555) 010-9999", &schemes()), Ok("+15550109999".into()));
		assert_eq!(FieldKind::Phone.clean("555 0100", &schemes()), Ok("5550100".into()));
		assert!(FieldKind::Phone.clean("12345", &schemes()).is_err());
		assert!(FieldKind::Phone.clean("1234567890123456", &schemes()).is_err());
	}

	#[test]
	fn urls_are_restricted_to_allowed_schemes() {
		assert_eq!(
			FieldKind::Url.clean(" https://example.com/a ", &schemes()),
			Ok("https://example.com/a".into())
		);
		assert!(FieldKind::Url.clean("javascript:alert(1)", &schemes()).is_err());
		assert!(FieldKind::Url.clean("ftp://example.com", &schemes()).is_err());
		assert!(FieldKind::Url.clean("not a url", &schemes()).is_err());
	}

	#[test]
	fn kinds_resolve_by_path_then_name() {
		let rules = FieldRules::default()
			.kind("profile.bio", FieldKind::Raw)
			.kind("items.link", FieldKind::Text)
			.require("contact.email");

		assert_eq!(rules.kind_for("profile.bio", Some("bio")), FieldKind::Raw);
		assert_eq!(rules.kind_for("items[3].link", Some("link")), FieldKind::Text);
		assert_eq!(rules.kind_for("guest.workEmail", Some("workEmail")), FieldKind::Email);
		assert_eq!(rules.kind_for("guest.mobile_number", Some("mobile_number")), FieldKind::Phone);
		assert_eq!(rules.kind_for("hotel", Some("hotel")), FieldKind::Text);
		assert_eq!(rules.kind_for("avatarUrl", Some("avatarUrl")), FieldKind::Url);
		assert!(rules.is_required("contact.email", Some("email")));
		assert!(!rules.is_required("billing.email", Some("email")));
	}
}
