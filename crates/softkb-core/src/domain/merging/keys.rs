//! Deduplication keys and name variants

use serde_json::Value as Json;

/// Title-cased spelling of an all-uppercase term
///
/// The first character and every character following a space or a hyphen
/// are kept, the others lower-cased. Terms that are not all-uppercase have no
/// variant.
pub fn capitalized_variant(term: &str) -> Option<String> {
    let has_upper = term.chars().any(char::is_uppercase);
    let has_lower = term.chars().any(char::is_lowercase);
    if !has_upper || has_lower {
        return None;
    }

    let mut variant = String::with_capacity(term.len());
    let mut start = true;
    for c in term.chars() {
        if start {
            start = false;
            variant.push(c);
        } else if c == ' ' || c == '-' {
            start = true;
            variant.push(c);
        } else {
            variant.extend(c.to_lowercase());
        }
    }
    Some(variant)
}

/// Software label with quote characters removed
pub fn clean_software_name(label: &str) -> String {
    label.replace(['"', '\''], "")
}

/// Title and first-author-surname signature of a document
///
/// `title` is a string or a list whose first element is used; `authors` is a
/// list of CSL-style author objects whose first `family` name is used.
pub fn title_author_key(title: &Json, authors: &Json) -> Option<String> {
    let title = match title {
        Json::String(s) => s.as_str(),
        Json::Array(items) => items.first()?.as_str()?,
        _ => return None,
    };
    if title.is_empty() {
        return None;
    }

    let family = authors.as_array()?.first()?.get("family")?.as_str()?;

    Some(format!("{}_{}", squash(title), squash(family)))
}

fn squash(text: &str) -> String {
    text.replace(' ', "").to_lowercase()
}

/// Alphanumeric signature used to deduplicate reference strings
pub fn reference_signature(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capitalized_variant() {
        assert_eq!(capitalized_variant("STATA").as_deref(), Some("Stata"));
        assert_eq!(capitalized_variant("knitr"), None);
        assert_eq!(capitalized_variant("MICROSOFT WORD").as_deref(), Some("Microsoft Word"));
        assert_eq!(capitalized_variant("SAS-STAT").as_deref(), Some("Sas-Stat"));
        assert_eq!(capitalized_variant("SPSS 20").as_deref(), Some("Spss 20"));
        assert_eq!(capitalized_variant("ImageJ"), None);
        assert_eq!(capitalized_variant("2020"), None);
    }

    #[test]
    fn test_clean_software_name() {
        assert_eq!(clean_software_name("\"SPSS\""), "SPSS");
        assert_eq!(clean_software_name("R's survival"), "Rs survival");
    }

    #[test]
    fn test_title_author_key() {
        let authors = json!([{"family": "Van Rossum", "given": "Guido"}, {"family": "Drake"}]);
        assert_eq!(
            title_author_key(&json!(["Python Reference Manual"]), &authors).as_deref(),
            Some("pythonreferencemanual_vanrossum")
        );
        assert_eq!(
            title_author_key(&json!("Python Reference Manual"), &authors).as_deref(),
            Some("pythonreferencemanual_vanrossum")
        );
        assert_eq!(title_author_key(&json!([]), &authors), None);
        assert_eq!(title_author_key(&json!("T"), &json!([])), None);
        assert_eq!(title_author_key(&json!("T"), &json!([{"given": "A"}])), None);
    }

    #[test]
    fn test_reference_signature() {
        assert_eq!(
            reference_signature("Wickham, H. (2016) ggplot2."),
            reference_signature("wickham H 2016 ggplot2")
        );
    }
}
