use crate::models::product::LookupResult;

/// Merge provider results by rank.
///
/// The lowest rank (highest priority) result is primary and supplies every
/// field it has; each missing field is backfilled from the next result in rank
/// order that has it. Arrival order does not matter. The merged record keeps
/// the primary's source, rank and raw payload.
pub fn merge_results(results: &[LookupResult]) -> Option<LookupResult> {
    let mut ordered: Vec<&LookupResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.rank);

    let (primary, rest) = ordered.split_first()?;
    let mut merged = (*primary).clone();

    for fallback in rest {
        backfill(&mut merged.name, &fallback.name);
        backfill(&mut merged.brand, &fallback.brand);
        backfill(&mut merged.category, &fallback.category);
        backfill(&mut merged.description, &fallback.description);
        backfill(&mut merged.image_url, &fallback.image_url);
    }

    Some(merged)
}

fn backfill(target: &mut Option<String>, source: &Option<String>) {
    if target.is_none() {
        target.clone_from(source);
    }
}
