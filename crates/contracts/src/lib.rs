use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod canonical;

pub const SOCIAL_LINKEDIN: &str = "linkedin";
pub const SOCIAL_GITHUB: &str = "github";

/// Social link keys the dashboard edits. Other keys found in a stored
/// document are carried through untouched.
pub const EDITABLE_SOCIAL_KEYS: [&str; 2] = [SOCIAL_LINKEDIN, SOCIAL_GITHUB];

/// The single content aggregate behind the site.
///
/// Field names match the on-disk JSON keys. `ProfileDocument::default()` is
/// the *empty* document; the populated first-run profile lives in the store
/// crate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub hero_text: String,
    #[serde(default)]
    pub about_text: String,
    /// Path relative to the static-asset root, e.g. `uploads/me.png`.
    #[serde(default, rename = "image")]
    pub image_path: String,
    #[serde(default)]
    pub contact_email: String,
    #[serde(default)]
    pub social_links: BTreeMap<String, String>,
    #[serde(default)]
    pub skills: Vec<Skill>,
    #[serde(default)]
    pub achievements: Vec<Achievement>,
    #[serde(default)]
    pub experience: Vec<Experience>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub blogs: Vec<BlogPost>,
    /// Top-level keys this version does not model. Kept so a save never drops
    /// data written by someone else.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ProfileDocument {
    pub fn social_link(&self, key: &str) -> &str {
        self.social_links.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn fingerprint(&self) -> String {
        canonical::fingerprint(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Skill {
    pub name: String,
    pub icon: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Achievement {
    pub title: String,
    pub desc: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Experience {
    pub year: String,
    pub role: String,
    pub company: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub name: String,
    pub desc: String,
    pub code: String,
    pub demo: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlogPost {
    pub title: String,
    pub excerpt: String,
    pub content: String,
    pub date: String,
}

/// A repeated entity edited through the dashboard.
///
/// `trimmed` strips surrounding whitespace from every attribute and
/// `is_retained` is the required-field policy applied after trimming.
pub trait Record: Sized {
    const KIND: &'static str;

    fn trimmed(self) -> Self;

    fn is_retained(&self) -> bool;
}

fn trim_owned(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.len() == value.len() {
        value
    } else {
        trimmed.to_string()
    }
}

impl Record for Skill {
    const KIND: &'static str = "skill";

    fn trimmed(self) -> Self {
        Self {
            name: trim_owned(self.name),
            icon: trim_owned(self.icon),
        }
    }

    fn is_retained(&self) -> bool {
        !self.name.is_empty()
    }
}

impl Record for Achievement {
    const KIND: &'static str = "achievement";

    fn trimmed(self) -> Self {
        Self {
            title: trim_owned(self.title),
            desc: trim_owned(self.desc),
        }
    }

    fn is_retained(&self) -> bool {
        !self.title.is_empty()
    }
}

impl Record for Experience {
    const KIND: &'static str = "experience";

    fn trimmed(self) -> Self {
        Self {
            year: trim_owned(self.year),
            role: trim_owned(self.role),
            company: trim_owned(self.company),
            description: trim_owned(self.description),
        }
    }

    // Either a year or a role is enough to keep a row.
    fn is_retained(&self) -> bool {
        !self.year.is_empty() || !self.role.is_empty()
    }
}

impl Record for Project {
    const KIND: &'static str = "project";

    fn trimmed(self) -> Self {
        Self {
            name: trim_owned(self.name),
            desc: trim_owned(self.desc),
            code: trim_owned(self.code),
            demo: trim_owned(self.demo),
        }
    }

    fn is_retained(&self) -> bool {
        !self.name.is_empty()
    }
}

impl Record for BlogPost {
    const KIND: &'static str = "blog";

    fn trimmed(self) -> Self {
        Self {
            title: trim_owned(self.title),
            excerpt: trim_owned(self.excerpt),
            content: trim_owned(self.content),
            date: trim_owned(self.date),
        }
    }

    fn is_retained(&self) -> bool {
        !self.title.is_empty()
    }
}

/// One complete edit submission, expressed as record objects.
///
/// Every field is a full replacement for its counterpart in the document;
/// an absent field means "empty", not "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EditBatch {
    pub name: String,
    pub title: String,
    pub subtitle: String,
    pub hero_text: String,
    pub about_text: String,
    pub contact_email: String,
    pub linkedin: String,
    pub github: String,
    pub skills: Vec<Skill>,
    pub achievements: Vec<Achievement>,
    pub experience: Vec<Experience>,
    pub projects: Vec<Project>,
    pub blogs: Vec<BlogPost>,
}
