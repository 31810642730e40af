//! Entity aggregation
//!
//! Both operations borrow their inputs and build a new entity starting from a
//! clone of the first operand, so a canonical record can be re-aggregated
//! against any number of incoming records without aliasing.

use serde_json::Value as Json;

use crate::domain::claims::{Entity, merge_references};

/// Combine two entities, appending the second entity's claim values verbatim
///
/// Claim values of `b` are appended after those of `a` with no redundancy
/// check. Scalar fields keep `a`'s value when set, aliases are unioned.
pub fn aggregate_no_merge(a: &Entity, b: &Entity) -> Entity {
    let mut result = a.clone();
    merge_scalars(&mut result, b);

    for (property, values) in &b.claims {
        result
            .claims
            .entry(property.clone())
            .or_default()
            .extend(values.iter().cloned());
    }

    result
}

/// Combine two entities, folding equal claim values together
///
/// A value of `b` equal on `(value, datatype)` to a value already in the
/// result has its references folded in by source id with summed counts;
/// other values are appended. Scalar fields keep `a`'s value when set,
/// aliases are unioned.
pub fn aggregate_with_merge(a: &Entity, b: &Entity) -> Entity {
    let mut result = a.clone();
    merge_scalars(&mut result, b);

    for (property, values) in &b.claims {
        let target = result.claims.entry(property.clone()).or_default();
        for incoming in values {
            match target.iter_mut().find(|existing| existing.same_claim(incoming)) {
                Some(existing) => merge_references(&mut existing.references, &incoming.references),
                None => target.push(incoming.clone()),
            }
        }
    }

    result
}

/// Left-fold [`aggregate_with_merge`] over a non-empty sequence
pub fn aggregate_all<'a, I>(entities: I) -> Option<Entity>
where
    I: IntoIterator<Item = &'a Entity>,
{
    let mut iter = entities.into_iter();
    let first = iter.next()?.clone();
    Some(iter.fold(first, |acc, next| aggregate_with_merge(&acc, next)))
}

fn merge_scalars(result: &mut Entity, b: &Entity) {
    if result.labels.is_empty() && !b.labels.is_empty() {
        result.labels.clone_from(&b.labels);
    }

    for alias in &b.aliases {
        if !result.aliases.contains(alias) {
            result.aliases.push(alias.clone());
        }
    }

    if is_blank(&result.summary) {
        result.summary.clone_from(&b.summary);
    }
    if is_blank(&result.descriptions) {
        result.descriptions.clone_from(&b.descriptions);
    }
    match (result.metadata.as_mut(), b.metadata.as_ref()) {
        (None, _) => result.metadata.clone_from(&b.metadata),
        // object fields missing on the left are filled from the right
        (Some(Json::Object(ours)), Some(Json::Object(theirs))) => {
            for (field, value) in theirs {
                if !ours.contains_key(field) {
                    ours.insert(field.clone(), value.clone());
                }
            }
        }
        _ => {}
    }

    result.index.fill_from(&b.index);
}

fn is_blank(field: &Option<String>) -> bool {
    field.as_deref().is_none_or(str::is_empty)
}
