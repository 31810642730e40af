//! Folding of near-duplicate claim values

use super::entity::Entity;
use super::source::merge_references;
use super::value::Value;

/// Text form used to compare free-text values
///
/// Removes the hyphen-space sequences PDF extraction leaves behind when a word
/// was broken across lines ("hyphen- ated" becomes "hyphenated").
pub fn normalize_text(text: &str) -> String {
    text.replace("- ", "")
}

fn equivalent(kept: &Value, candidate: &Value) -> bool {
    if kept.same_claim(candidate) {
        return true;
    }
    if !(kept.is_textual() && candidate.is_textual()) {
        return false;
    }
    match (kept.as_str(), candidate.as_str()) {
        (Some(a), Some(b)) => normalize_text(a) == normalize_text(b),
        _ => false,
    }
}

/// Fold duplicate and near-duplicate values of every claim
///
/// Values equal on `(value, datatype)`, and free-text values equal after
/// [`normalize_text`], are folded into their first occurrence; the folded
/// value's ledger absorbs the others through the source count rule. Returns
/// the number of values removed.
pub fn normalize_entity(entity: &mut Entity) -> usize {
    let mut removed = 0;
    for values in entity.claims.values_mut() {
        let mut kept: Vec<Value> = Vec::with_capacity(values.len());
        for value in values.drain(..) {
            match kept.iter_mut().find(|k| equivalent(k, &value)) {
                Some(existing) => {
                    merge_references(&mut existing.references, &value.references);
                    for qualifier in value.qualifiers {
                        if !existing.qualifiers.contains(&qualifier) {
                            existing.qualifiers.push(qualifier);
                        }
                    }
                    removed += 1;
                }
                None => kept.push(value),
            }
        }
        *values = kept;
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::claims::{EntityKind, PropertyCode, SourceRef};

    fn value(text: &str, source: &str, count: u64) -> Value {
        Value::string(text).with_source(&SourceRef::named(source).with_count(count))
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("this is test- ing"), "this is testing");
        assert_eq!(normalize_text("this is test-ing"), "this is test-ing");
    }

    #[test]
    fn test_hyphenation_artifacts_fold() {
        let mut entity = Entity::new(EntityKind::Software, "s1");
        entity.claims.insert(
            PropertyCode::Quotation,
            vec![
                value("this is testing", "software-mentions", 200),
                value("this is test- ing", "rOpenSci", 1),
                value("this is test-ing", "CRAN", 1),
            ],
        );

        let removed = normalize_entity(&mut entity);
        assert_eq!(removed, 1);

        let values = entity.values(&PropertyCode::Quotation);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].as_str(), Some("this is testing"));
        assert_eq!(values[0].count_for("software-mentions"), 200);
        assert_eq!(values[0].count_for("rOpenSci"), 1);
        assert_eq!(values[1].as_str(), Some("this is test-ing"));
    }

    #[test]
    fn test_exact_duplicates_fold_for_any_datatype() {
        let mut entity = Entity::new(EntityKind::Software, "s1");
        let mentions = SourceRef::named("software-mentions");
        entity.claims.insert(
            PropertyCode::SaidToBeTheSameAs,
            vec![
                Value::new(179088, crate::domain::claims::Datatype::Url).with_source(&mentions),
                Value::new(179088, crate::domain::claims::Datatype::Url)
                    .with_source(&mentions.clone().with_count(20)),
                Value::item("Q181596").with_source(&mentions),
            ],
        );

        normalize_entity(&mut entity);

        let values = entity.values(&PropertyCode::SaidToBeTheSameAs);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].count_for("software-mentions"), 21);
    }

    #[test]
    fn test_non_textual_values_are_not_text_folded() {
        let mut entity = Entity::new(EntityKind::Software, "s1");
        entity.claims.insert(
            PropertyCode::ReferenceUrl,
            vec![
                Value::url("http://x.org/a- b"),
                Value::url("http://x.org/ab"),
            ],
        );
        assert_eq!(normalize_entity(&mut entity), 0);
        assert_eq!(entity.values(&PropertyCode::ReferenceUrl).len(), 2);
    }
}
