//! Lexical helpers for image paths.
//!
//! Paths inside a build are always POSIX paths, independent of the host, so
//! these work on strings rather than `std::path`.

/// Returns the shortest lexically equivalent path.
///
/// Repeated separators are collapsed, `.` elements dropped and `..` elements
/// resolved against their parent. An empty result becomes `"."`.
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(".."),
            },
            _ => parts.push(part),
        }
    }

    let joined = parts.join("/");

    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

pub fn is_abs(path: &str) -> bool {
    path.starts_with('/')
}

/// All but the last element of `path`, cleaned.
pub fn dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => clean(&path[..=idx]),
        None => ".".to_string(),
    }
}

/// The last element of `path`, ignoring trailing slashes.
pub fn base(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }

    match trimmed.rfind('/') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Joins the non-empty elements with `/` and cleans the result.
pub fn join<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let parts: Vec<&str> = parts.into_iter().filter(|p| !p.is_empty()).collect();

    if parts.is_empty() {
        return String::new();
    }

    clean(&parts.join("/"))
}

/// Resolves `path` against `dir` unless it is already absolute.
///
/// A trailing slash on `path` is preserved, since copy destinations use it to
/// mean "into this directory".
pub fn resolve(dir: &str, path: &str) -> String {
    let resolved = if is_abs(path) { clean(path) } else { join([dir, path]) };
    let resolved = if resolved.is_empty() { "/".to_string() } else { resolved };

    if path.ends_with('/') && !resolved.ends_with('/') {
        format!("{}/", resolved)
    } else {
        resolved
    }
}
