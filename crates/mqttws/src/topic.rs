//! Topic name/filter validation and wildcard matching.

/// Checks whether a topic name is valid for publishing (no wildcards).
pub fn is_valid_topic_name(topic: &str) -> bool {
    !topic.is_empty()
        && topic.len() <= 65535
        && !topic.contains(['+', '#'])
        && !topic.contains('\0')
}

/// Checks whether a topic filter is valid for subscribing.
///
/// `+` must occupy a whole level; `#` must occupy the final level.
pub fn is_valid_topic_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.len() > 65535 || filter.contains('\0') {
        return false;
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != "#" || i != levels.len() - 1 {
                return false;
            }
        } else if level.contains('+') && *level != "+" {
            return false;
        }
    }
    true
}

/// Matches a topic name against a subscription filter.
pub fn topic_matches_filter(filter: &str, topic: &str) -> bool {
    // Topics starting with '$' are never matched by wildcard-leading filters.
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            // "sport/#" also matches "sport" itself.
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
