//! JSON merge patch helpers (RFC 7386)

/// Applies a merge patch to `target` in place
pub fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    let serde_json::Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = serde_json::Value::Object(serde_json::Map::new());
    }
    if let serde_json::Value::Object(target_map) = target {
        for (k, v) in patch_map {
            if v.is_null() {
                target_map.remove(k);
            } else {
                merge_patch(target_map.entry(k.clone()).or_insert(serde_json::Value::Null), v);
            }
        }
    }
}

/// Whether applying `patch` to `current` would change it
pub fn patch_changes(current: &serde_json::Value, patch: &serde_json::Value) -> bool {
    let mut patched = current.clone();
    merge_patch(&mut patched, patch);
    &patched != current
}
