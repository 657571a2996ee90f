use std::collections::HashMap;

/// Parse `key=value&key2=value2` pairs, percent-decoding values.
///
/// `+` is treated as an encoded space, as browsers send it in query strings and
/// `application/x-www-form-urlencoded` bodies. Only the last value of a repeated
/// key is kept.
///
/// # Example
/// ```
/// use yatube::core::query_params::parse_pairs;
/// let params = parse_pairs("user=john+doe&page=2");
/// assert_eq!(params.get("user"), Some(&"john doe".to_string()));
/// assert_eq!(params.get("page"), Some(&"2".to_string()));
/// ```
pub fn parse_pairs(raw: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for param in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        params.insert(decode(key), decode(value));
    }

    params
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Query parameters of a URI string (everything after `?`).
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    match uri.split_once('?') {
        Some((_, query)) => parse_pairs(query),
        None => HashMap::new(),
    }
}

/// Decode a urlencoded form body.
pub fn parse_form_body(body: &[u8]) -> HashMap<String, String> {
    parse_pairs(&String::from_utf8_lossy(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_cyrillic_form_values() {
        let body = "text=%D0%9D%D0%BE%D0%B2%D1%8B%D0%B9+%D0%BF%D0%BE%D1%81%D1%82&group=";
        let form = parse_form_body(body.as_bytes());
        assert_eq!(form["text"], "Новый пост");
        assert_eq!(form["group"], "");
    }

    #[test]
    fn query_params_ignore_path() {
        let params = parse_query_params("/group/bear/?page=2&flag");
        assert_eq!(params.get("page").map(String::as_str), Some("2"));
        assert_eq!(params.get("flag").map(String::as_str), Some(""));
        assert!(!params.contains_key("missing"));
        assert!(parse_query_params("/").is_empty());
    }
}
