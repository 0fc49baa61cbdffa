use crate::objects::Labels;

/// Parse an equality-based label selector such as `app=web,tier=frontend`.
/// An empty selector selects everything.
pub fn parse_selector(selector: &str) -> Option<Labels> {
    let mut labels = Labels::new();
    for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (key, value) = term.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        labels = labels.insert(key, value.trim_start_matches('=').trim());
    }
    Some(labels)
}

/// Every term of the selector must be present in `labels`.
pub fn selector_match(selector: &Labels, labels: &Labels) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key.as_str()) == Some(value))
}
