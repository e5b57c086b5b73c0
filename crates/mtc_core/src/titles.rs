use serde::Serialize;

pub const NS_MAIN: i32 = 0;
pub const NS_USER: i32 = 2;
pub const NS_PROJECT: i32 = 4;
pub const NS_FILE: i32 = 6;
pub const NS_TEMPLATE: i32 = 10;
pub const NS_CATEGORY: i32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Namespace {
    Main,
    User,
    Project,
    File,
    Template,
    Category,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "Main",
            Self::User => "User",
            Self::Project => "Project",
            Self::File => "File",
            Self::Template => "Template",
            Self::Category => "Category",
        }
    }

    pub fn id(self) -> i32 {
        match self {
            Self::Main => NS_MAIN,
            Self::User => NS_USER,
            Self::Project => NS_PROJECT,
            Self::File => NS_FILE,
            Self::Template => NS_TEMPLATE,
            Self::Category => NS_CATEGORY,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            NS_MAIN => Some(Self::Main),
            NS_USER => Some(Self::User),
            NS_PROJECT => Some(Self::Project),
            NS_FILE => Some(Self::File),
            NS_TEMPLATE => Some(Self::Template),
            NS_CATEGORY => Some(Self::Category),
            _ => None,
        }
    }

    /// Title prefix including the trailing colon; empty for the main namespace.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Main => "",
            Self::User => "User:",
            Self::Project => "Wikipedia:",
            Self::File => "File:",
            Self::Template => "Template:",
            Self::Category => "Category:",
        }
    }
}

fn namespace_for_prefix(prefix: &str) -> Option<Namespace> {
    let trimmed = prefix.trim();
    if trimmed.eq_ignore_ascii_case("Category") {
        return Some(Namespace::Category);
    }
    if trimmed.eq_ignore_ascii_case("File") || trimmed.eq_ignore_ascii_case("Image") {
        return Some(Namespace::File);
    }
    if trimmed.eq_ignore_ascii_case("User") {
        return Some(Namespace::User);
    }
    if trimmed.eq_ignore_ascii_case("Template") {
        return Some(Namespace::Template);
    }
    if trimmed.eq_ignore_ascii_case("Wikipedia") || trimmed.eq_ignore_ascii_case("Project") {
        return Some(Namespace::Project);
    }
    None
}

/// Split a title into its namespace and the remaining body.
pub fn split_namespace(title: &str) -> (Namespace, &str) {
    if let Some((prefix, rest)) = title.split_once(':')
        && let Some(namespace) = namespace_for_prefix(prefix)
    {
        return (namespace, rest.trim_start());
    }
    (Namespace::Main, title)
}

/// Title without its namespace prefix.
pub fn strip_namespace(title: &str) -> &str {
    split_namespace(title).1
}

/// Prefix `title` with `namespace` unless it is already in that namespace.
pub fn ensure_namespace(title: &str, namespace: Namespace) -> String {
    let trimmed = title.trim();
    match split_namespace(trimmed) {
        (found, body) if found == namespace => format!("{}{}", namespace.prefix(), body),
        _ => format!("{}{}", namespace.prefix(), trimmed),
    }
}

/// Title as the wiki resolves it from `namespace`: bare titles gain the prefix,
/// titles already in another namespace are left as written.
pub fn qualify_title(title: &str, namespace: Namespace) -> String {
    let trimmed = title.trim();
    match split_namespace(trimmed) {
        (Namespace::Main, _) => format!("{}{}", namespace.prefix(), trimmed),
        (found, body) if found == namespace => format!("{}{}", namespace.prefix(), body),
        _ => trimmed.to_string(),
    }
}

/// Canonical form of a title as seen from `namespace`: underscores become spaces,
/// whitespace runs collapse, the namespace prefix is removed and the first letter
/// is upper-cased.
pub fn canonical_title(title: &str, namespace: Namespace) -> String {
    let spaced = normalize_spaces(&title.replace('_', " "));
    let mut body = spaced.trim_start_matches(':').trim_start();
    if let Some((prefix, rest)) = body.split_once(':')
        && namespace_for_prefix(prefix) == Some(namespace)
    {
        body = rest.trim_start();
    }
    upper_first(body)
}

pub fn normalize_spaces(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut previous_was_space = false;

    for ch in value.chars() {
        if ch.is_whitespace() {
            if !previous_was_space {
                output.push(' ');
                previous_was_space = true;
            }
        } else {
            output.push(ch);
            previous_was_space = false;
        }
    }

    output.trim().to_string()
}

fn upper_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
