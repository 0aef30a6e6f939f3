//! Attribution lookup in nested upstream payloads.
//!
//! CI servers bury the user who triggered a build somewhere inside `actions`,
//! `causes` or `culprits`. The search walks the tree depth first and stops at the
//! first string found under one of the wanted keys.

use std::collections::HashSet;

use serde_json::Value;

/// Keys checked at every node, in priority order.
pub const ATTRIBUTION_KEYS: [&str; 2] = ["userName", "fullName"];

pub const DEFAULT_MAX_DEPTH: usize = 16;

pub fn find_attribution(root: &Value) -> Option<String> {
    find_attribution_within(root, &ATTRIBUTION_KEYS, DEFAULT_MAX_DEPTH)
}

/// Depth-first search for the first non-empty string under any of `keys`.
///
/// All keys are checked on a node before any child is visited. Children deeper
/// than `max_depth` levels below `root` are not searched, and a node is never
/// visited twice.
pub fn find_attribution_within(root: &Value, keys: &[&str], max_depth: usize) -> Option<String> {
    let mut visited = HashSet::new();
    search(root, keys, max_depth, &mut visited).map(str::to_owned)
}

fn search<'a>(
    node: &'a Value,
    keys: &[&str],
    depth_left: usize,
    visited: &mut HashSet<*const Value>,
) -> Option<&'a str> {
    if !visited.insert(node as *const Value) {
        return None;
    }

    match node {
        Value::Object(map) => {
            let hit = keys.iter().find_map(|key| match map.get(*key) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
                _ => None,
            });
            if hit.is_some() || depth_left == 0 {
                return hit;
            }
            map.values()
                .find_map(|child| search(child, keys, depth_left - 1, visited))
        }
        Value::Array(items) if depth_left > 0 => items
            .iter()
            .find_map(|child| search(child, keys, depth_left - 1, visited)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn finds_user_nested_in_build_causes() {
        let build = json!({
            "id": "42",
            "actions": [
                {},
                { "causes": [{ "shortDescription": "Started by user", "userName": "alice" }] }
            ]
        });
        assert_eq!(find_attribution(&build).as_deref(), Some("alice"));
    }

    #[test]
    fn top_level_key_beats_nested_ones() {
        let build = json!({
            "fullName": "Top Level",
            "culprits": [{ "userName": "nested" }]
        });
        assert_eq!(find_attribution(&build).as_deref(), Some("Top Level"));
    }

    #[test]
    fn user_name_is_preferred_over_full_name_on_the_same_node() {
        let node = json!({ "fullName": "Alice A.", "userName": "alice" });
        assert_eq!(find_attribution(&node).as_deref(), Some("alice"));
    }

    #[test]
    fn first_hit_stops_the_search() {
        // sibling "b" also matches but "a" is visited first
        let tree = json!({ "a": { "x": { "userName": "first" } }, "b": { "userName": "second" } });
        assert_eq!(find_attribution(&tree).as_deref(), Some("first"));
    }

    #[rstest]
    #[case::empty_object(json!({}))]
    #[case::null(json!(null))]
    #[case::scalar(json!("userName"))]
    #[case::non_string_value(json!({ "userName": 7 }))]
    #[case::empty_string(json!({ "userName": "" }))]
    fn nothing_to_attribute(#[case] value: Value) {
        assert_eq!(find_attribution(&value), None);
    }

    #[test]
    fn depth_limit_bounds_the_search() {
        let deep = json!({ "a": { "b": { "c": { "userName": "deep" } } } });
        assert_eq!(find_attribution_within(&deep, &ATTRIBUTION_KEYS, 2), None);
        assert_eq!(
            find_attribution_within(&deep, &ATTRIBUTION_KEYS, 3).as_deref(),
            Some("deep")
        );
    }

    #[test]
    fn very_deep_trees_do_not_recurse_past_the_default_limit() {
        let mut value = json!({ "userName": "bottom" });
        for _ in 0..100 {
            value = json!({ "next": value });
        }
        assert_eq!(find_attribution(&value), None);
    }
}
