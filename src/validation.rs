//! Input cleaning rules applied before anything reaches the repository.
//!
//! Every rule either returns the cleaned value or a field error; nothing is silently
//! truncated.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use validator::Validate;

use crate::{
    error::FieldErrors,
    models::{BookForm, CleanBook, ContactForm, RegisterRequest},
};

pub const TITLE_MIN_LEN: usize = 2;
pub const TITLE_MAX_LEN: usize = 200;
pub const AUTHOR_MAX_LEN: usize = 100;
pub const NAME_MAX_LEN: usize = 100;
pub const YEAR_MIN: i64 = 1000;
pub const YEAR_MAX: i64 = 2100;

const UNSAFE_CHARS: [char; 4] = ['<', '>', '"', '\''];

fn author_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z\s.\-]+$").expect("valid author regex"))
}

fn script_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script.*?</script>").expect("valid script regex"))
}

/// Removes `<`, `>`, `"` and `'`.
pub fn strip_unsafe_chars(input: &str) -> String {
    input.chars().filter(|c| !UNSAFE_CHARS.contains(c)).collect()
}

pub fn clean_title(raw: Option<&str>) -> Result<String, String> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err("Title is required.".to_string());
    }

    let title = strip_unsafe_chars(raw);
    let title = title.trim();
    let len = title.chars().count();
    if len < TITLE_MIN_LEN {
        return Err("Title must be at least 2 characters long.".to_string());
    }
    if len > TITLE_MAX_LEN {
        return Err(format!(
            "Ensure this value has at most {TITLE_MAX_LEN} characters (it has {len})."
        ));
    }
    Ok(title.to_string())
}

pub fn clean_author(raw: Option<&str>) -> Result<String, String> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err("Author is required.".to_string());
    }

    let author = strip_unsafe_chars(raw);
    if !author_regex().is_match(&author) {
        return Err("Author name contains invalid characters.".to_string());
    }
    let author = author.trim();
    if author.is_empty() {
        return Err("Author is required.".to_string());
    }
    let len = author.chars().count();
    if len > AUTHOR_MAX_LEN {
        return Err(format!(
            "Ensure this value has at most {AUTHOR_MAX_LEN} characters (it has {len})."
        ));
    }
    Ok(author.to_string())
}

/// Accepts an integer, an integral float, or a numeric string.
pub fn clean_publication_year(raw: Option<&Value>) -> Result<i32, String> {
    const REQUIRED: &str = "Publication year is required.";
    const NOT_A_NUMBER: &str = "Enter a whole number.";

    let year = match raw {
        None | Some(Value::Null) => return Err(REQUIRED.to_string()),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(v) => v,
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => f as i64,
                _ => return Err(NOT_A_NUMBER.to_string()),
            },
        },
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Err(REQUIRED.to_string());
            }
            s.parse::<i64>().map_err(|_| NOT_A_NUMBER.to_string())?
        }
        Some(_) => return Err(NOT_A_NUMBER.to_string()),
    };

    if year == 0 {
        return Err(REQUIRED.to_string());
    }
    if !(YEAR_MIN..=YEAR_MAX).contains(&year) {
        return Err(format!(
            "Publication year must be between {YEAR_MIN} and {YEAR_MAX}."
        ));
    }
    // Range check above keeps this lossless.
    Ok(year as i32)
}

/// Runs every field rule and reports all failures at once.
pub fn clean_book_form(form: &BookForm) -> Result<CleanBook, FieldErrors> {
    let mut errors = FieldErrors::new();

    let title = clean_title(form.title.as_deref())
        .map_err(|e| errors.add("title", e))
        .ok();
    let author = clean_author(form.author.as_deref())
        .map_err(|e| errors.add("author", e))
        .ok();
    let publication_year = clean_publication_year(form.publication_year.as_ref())
        .map_err(|e| errors.add("publication_year", e))
        .ok();

    match (title, author, publication_year) {
        (Some(title), Some(author), Some(publication_year)) if errors.is_empty() => Ok(CleanBook {
            title,
            author,
            publication_year,
        }),
        _ => Err(errors),
    }
}

/// Script blocks go first: stripping brackets first would leave the block's body behind.
pub fn sanitize_message(input: &str) -> String {
    let without_scripts = script_block_regex().replace_all(input, "");
    without_scripts
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn sanitize_name(input: &str) -> String {
    strip_unsafe_chars(input).trim().to_string()
}

pub fn clean_contact_form(form: &ContactForm) -> Result<ContactForm, FieldErrors> {
    form.validate().map_err(FieldErrors::from)?;

    let cleaned = ContactForm {
        name: sanitize_name(&form.name),
        email: form.email.trim().to_string(),
        message: sanitize_message(&form.message),
    };

    let mut errors = FieldErrors::new();
    if cleaned.name.is_empty() {
        errors.add("name", "This field is required.");
    }
    if cleaned.message.is_empty() {
        errors.add("message", "This field is required.");
    }
    if errors.is_empty() { Ok(cleaned) } else { Err(errors) }
}

/// Sanitizes a free-text entity name (library, librarian) and requires it to be non-empty.
pub fn clean_entity_name(field: &str, raw: &str) -> Result<String, FieldErrors> {
    let name = sanitize_name(raw);
    let mut errors = FieldErrors::new();
    if name.is_empty() {
        errors.add(field, "This field is required.");
    } else if name.chars().count() > NAME_MAX_LEN {
        errors.add(
            field,
            format!("Ensure this value has at most {NAME_MAX_LEN} characters."),
        );
    }
    if errors.is_empty() { Ok(name) } else { Err(errors) }
}

fn is_valid_username_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_')
}

pub fn clean_registration(form: &RegisterRequest) -> Result<(), FieldErrors> {
    let mut errors = form
        .validate()
        .err()
        .map(FieldErrors::from)
        .unwrap_or_default();

    if !form.username.chars().all(is_valid_username_char) {
        errors.add(
            "username",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        );
    }
    if form.password != form.password_confirm {
        errors.add("password_confirm", "The two password fields didn't match.");
    }
    if !form.password.is_empty() && form.password.chars().all(|c| c.is_ascii_digit()) {
        errors.add("password", "This password is entirely numeric.");
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
