//! Attribute patterns for scanning CFDI text that does not parse as XML.

use once_cell::sync::Lazy;
use regex::Regex;

const UUID: &str = r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}";

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern")
}

pub static UUID_ATTR: Lazy<Regex> =
    Lazy::new(|| compile(&format!(r#"(?i)\bUUID\s*=\s*['"]({UUID})['"]"#)));

pub static ID_DOCUMENTO_ATTR: Lazy<Regex> =
    Lazy::new(|| compile(&format!(r#"(?i)\bIdDocumento\s*=\s*['"]({UUID})['"]"#)));

pub static BARE_UUID: Lazy<Regex> = Lazy::new(|| compile(&format!(r"(?i)\b({UUID})\b")));

pub static RECEPTOR_NOMBRE: Lazy<Regex> =
    Lazy::new(|| compile(r#"(?i)Receptor[^>]*?\bNombre\s*=\s*['"]([^'"]+)['"]"#));

pub static RECEPTOR_RFC: Lazy<Regex> =
    Lazy::new(|| compile(r#"(?i)Receptor[^>]*?\bRfc\s*=\s*['"]([^'"]+)['"]"#));

pub static EMISOR_RFC: Lazy<Regex> =
    Lazy::new(|| compile(r#"(?i)Emisor[^>]*?\bRfc\s*=\s*['"]([^'"]+)['"]"#));

// `\b` keeps `Total=` from matching inside `SubTotal=`.
pub static SUBTOTAL: Lazy<Regex> =
    Lazy::new(|| compile(r#"(?i)\bSubTotal\s*=\s*['"](\d+(?:\.\d+)?)['"]"#));

pub static TOTAL: Lazy<Regex> =
    Lazy::new(|| compile(r#"(?i)\bTotal\s*=\s*['"](\d+(?:\.\d+)?)['"]"#));

pub static FECHA: Lazy<Regex> = Lazy::new(|| compile(r#"(?i)\bFecha\s*=\s*['"]([^'"]+)['"]"#));

/// First capture group of the first match.
pub fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}
