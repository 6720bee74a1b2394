use crate::types::{Scope, ScopeKey, ScoredResponse, UNKNOWN_SCOPE_VALUE};
use std::collections::BTreeMap;

/// Responses grouped by bucket, ordered by scope then value
pub type Buckets<'a> = BTreeMap<ScopeKey, Vec<&'a ScoredResponse>>;

/// Bucket of `response` within `scope`. Missing or blank dimensions land in "Unknown".
pub fn scope_key_for(response: &ScoredResponse, scope: Scope) -> ScopeKey {
    fn value_or_unknown(value: Option<&str>) -> String {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => UNKNOWN_SCOPE_VALUE.to_string(),
        }
    }

    match scope {
        Scope::Overall => ScopeKey::Overall,
        Scope::Platform => ScopeKey::Platform(value_or_unknown(Some(&response.platform))),
        Scope::Topic => ScopeKey::Topic(value_or_unknown(response.topic.as_deref())),
        Scope::Persona => ScopeKey::Persona(value_or_unknown(response.persona.as_deref())),
    }
}

/// Split responses into disjoint, exhaustive buckets of one scope.
/// Does not filter: callers pass only the responses they want counted.
pub fn partition<'a, I>(responses: I, scope: Scope) -> Buckets<'a>
where
    I: IntoIterator<Item = &'a ScoredResponse>,
{
    responses.into_iter().fold(BTreeMap::new(), |mut buckets, response| {
        buckets
            .entry(scope_key_for(response, scope))
            .or_insert_with(Vec::new)
            .push(response);
        buckets
    })
}

/// Buckets of every scope in one map. Keys never collide across scopes.
pub fn partition_all<'a>(responses: &[&'a ScoredResponse]) -> Buckets<'a> {
    Scope::ALL
        .iter()
        .flat_map(|scope| partition(responses.iter().copied(), *scope))
        .collect()
}
