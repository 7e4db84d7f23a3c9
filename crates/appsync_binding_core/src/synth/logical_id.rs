use sha2::{Digest, Sha256};

const HASH_LEN: usize = 8;
const MAX_HUMAN_LEN: usize = 240;
const HIDDEN_COMPONENTS: [&str; 2] = ["Resource", "Default"];

/// Logical id for a construct path relative to its stack.
///
/// A single-component path keeps its sanitized name. Longer paths join the
/// human-readable components and append a hash of the full path so that
/// siblings with the same sanitized name stay distinct.
pub fn logical_id(path: &[&str]) -> String {
    if let [single] = path {
        return sanitize(single);
    }

    let mut human = String::new();
    let mut previous: Option<&str> = None;
    for component in path {
        if HIDDEN_COMPONENTS.contains(component) || previous == Some(*component) {
            continue;
        }
        human.push_str(&sanitize(component));
        previous = Some(*component);
    }
    human.truncate(MAX_HUMAN_LEN);

    format!("{human}{}", path_hash(path))
}

fn path_hash(path: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.join("/"));
    let digest = format!("{:X}", hasher.finalize());
    digest[..HASH_LEN].to_string()
}

fn sanitize(component: &str) -> String {
    component
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}
